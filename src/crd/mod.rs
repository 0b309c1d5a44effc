//! # Custom Resource Definitions
//!
//! CRD types for the Trust Bundle Controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - The cluster-scoped `Bundle` resource
//! - `source.rs` - Source descriptors (inline, ConfigMap, Secret, default package)
//! - `target.rs` - Target descriptors and additional output formats
//! - `status.rs` - Status types for tracking reconciliation state

mod source;
mod spec;
mod status;
mod target;

// Re-export all public types
pub use source::{BundleSource, SourceObjectKeySelector};
pub use spec::{Bundle, BundleSpec};
pub use status::{BundleStatus, Condition};
pub use target::{
    default_jks_password, default_pkcs12_password, AdditionalFormats, BundleTarget, JksFormat,
    KeyValueTarget, ObjectKind, Pkcs12Format, TargetMetadata,
};
