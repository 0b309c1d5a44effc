//! Trust Bundle Controller Library
//!
//! Resolution, encoding and distribution of CA trust bundles, plus the
//! runtime that drives them from Kubernetes watches.
//!
//! ## Quick Start
//!
//! ```rust
//! use trust_bundle_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
