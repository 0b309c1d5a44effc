//! # Reconciler
//!
//! Core reconciliation logic for `Bundle` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Validate the Bundle spec
//! 2. Resolve every source, in order, into one canonical PEM bundle
//! 3. Encode JKS and PKCS#12 truststores if requested
//! 4. Sync the ConfigMap and Secret targets in every selected namespace
//! 5. Record the outcome in the `Synced` condition

pub mod client;
pub mod events;
pub mod formats;
pub mod reconcile;
pub mod selector;
pub mod source;
pub mod status;
pub mod target;
pub mod types;
pub mod validation;

// Re-export public API
pub use client::KubeStore;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use reconcile::{reconcile, BundleEngine, SyncOutcome};
pub use source::{KeyValueObject, ResolvedBundle, SourceResolver, SourceStore};
pub use target::{
    DesiredTarget, NamespaceInfo, SyncReport, TargetAction, TargetObject, TargetOutcome,
    TargetStore, TargetSynchronizer,
};
pub use types::{BackoffState, Reconciler, ReconcilerError};
pub use validation::validate_bundle;
