//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use trust_bundle_controller::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Store and event traits - needed to drive the engine outside a cluster
pub use crate::controller::reconciler::{
    EventPublisher, KeyValueObject, NamespaceInfo, SourceStore, TargetObject, TargetStore,
};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, validate_bundle, BackoffState, BundleEngine, Reconciler, ReconcilerError,
    ResolvedBundle, SyncOutcome, SyncReport, TargetAction,
};

// Config types
pub use crate::config::ControllerConfig;

// Common error types
pub use crate::controller::error::BundleError;
