//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the Bundle custom resource
pub const API_GROUP: &str = "trust.microscaler.io";

/// Prefix reserved for labels and annotations written by the controller.
/// User-supplied target metadata must not use it.
pub const RESERVED_METADATA_PREFIX: &str = "trust.microscaler.io/";

/// Label placed on every target object, value is the owning Bundle name
pub const BUNDLE_LABEL_KEY: &str = "trust.microscaler.io/bundle";

/// Annotation holding the sha256 hex digest of the canonical bundle
pub const BUNDLE_HASH_ANNOTATION_KEY: &str = "trust.microscaler.io/hash";

/// Condition type written to the Bundle status after every pass
pub const SYNCED_CONDITION_TYPE: &str = "Synced";

/// Default field manager used for server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "trust-bundle-controller";

/// Default namespace holding ConfigMap and Secret sources
pub const DEFAULT_TRUST_NAMESPACE: &str = "trust-system";

/// Default JKS store password (the conventional Java truststore password)
pub const DEFAULT_JKS_PASSWORD: &str = "changeit";

/// Default PKCS#12 store password
pub const DEFAULT_PKCS12_PASSWORD: &str = "";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Default requeue interval when a source object or key is missing (seconds)
/// Sources are often created moments after the Bundle that references them
pub const DEFAULT_NOT_FOUND_REQUEUE_SECS: u64 = 15;

/// Default upper bound for a single reconcile pass (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;

/// Default number of target writes in flight per Bundle
pub const DEFAULT_MAX_CONCURRENT_TARGET_WRITES: usize = 10;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default first retry delay after a failed reconcile (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Default cap on the retry delay after repeated failures (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;
