//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace holding the ConfigMaps and Secrets that Bundles reference
    pub trust_namespace: String,
    /// Path of the default CA package JSON document
    /// When unset, Bundles using `useDefaultCAs: true` fail with NoDefaultPackage
    pub default_package_location: Option<PathBuf>,
    /// Field manager used for server-side apply of target objects
    pub field_manager: String,
    /// Additional manager name whose update-based writes are migrated to server-side apply
    /// Update-operation entries under `field_manager` are always treated as legacy
    pub legacy_field_manager: Option<String>,
    /// Drop expired certificates from sources instead of keeping them
    pub filter_expired_certificates: bool,
    /// Allow Bundles to write Secret targets
    /// Requires the controller to hold cluster-wide Secret write permissions
    pub secret_targets_enabled: bool,
    /// Maximum number of target writes in flight for a single Bundle
    pub max_concurrent_target_writes: usize,
    /// Upper bound for one reconcile pass (seconds)
    pub reconcile_timeout_secs: u64,
    /// Requeue interval when a referenced source is missing (seconds)
    pub not_found_requeue_secs: u64,
    /// Reconciliation error requeue interval (seconds)
    /// Used when the per-resource backoff state cannot be read
    pub reconciliation_error_requeue_secs: u64,
    /// First retry delay after a failed reconcile (seconds)
    pub backoff_min_secs: u64,
    /// Cap on the retry delay after repeated failures (seconds)
    pub backoff_max_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// HTTP server port for metrics and probes
    pub metrics_port: u16,
    /// How long to wait for the HTTP server to bind (seconds)
    pub server_startup_timeout_secs: u64,
    /// Readiness poll interval while waiting for the HTTP server (milliseconds)
    pub server_poll_interval_ms: u64,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            trust_namespace: DEFAULT_TRUST_NAMESPACE.to_string(),
            default_package_location: None,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            legacy_field_manager: None,
            filter_expired_certificates: false,
            secret_targets_enabled: false,
            max_concurrent_target_writes: DEFAULT_MAX_CONCURRENT_TARGET_WRITES,
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            not_found_requeue_secs: DEFAULT_NOT_FOUND_REQUEUE_SECS,
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            trust_namespace: env_var_or_default_str("TRUST_NAMESPACE", DEFAULT_TRUST_NAMESPACE),
            default_package_location: env_var_opt("DEFAULT_PACKAGE_LOCATION").map(PathBuf::from),
            field_manager: env_var_or_default_str("FIELD_MANAGER", DEFAULT_FIELD_MANAGER),
            legacy_field_manager: env_var_opt("LEGACY_FIELD_MANAGER"),
            filter_expired_certificates: env_var_or_default_bool(
                "FILTER_EXPIRED_CERTIFICATES",
                false,
            ),
            secret_targets_enabled: env_var_or_default_bool("SECRET_TARGETS_ENABLED", false),
            max_concurrent_target_writes: env_var_or_default(
                "MAX_CONCURRENT_TARGET_WRITES",
                DEFAULT_MAX_CONCURRENT_TARGET_WRITES,
            )
            .max(1),
            reconcile_timeout_secs: env_var_or_default(
                "RECONCILE_TIMEOUT_SECS",
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            ),
            not_found_requeue_secs: env_var_or_default(
                "NOT_FOUND_REQUEUE_SECS",
                DEFAULT_NOT_FOUND_REQUEUE_SECS,
            ),
            reconciliation_error_requeue_secs: env_var_or_default(
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            ),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS)
                .max(1),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            server_startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            server_poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Managers whose update-based writes are migrated to server-side apply
    #[must_use]
    pub fn legacy_field_managers(&self) -> Vec<String> {
        let mut managers = vec![self.field_manager.clone()];
        if let Some(legacy) = &self.legacy_field_manager {
            if !managers.contains(legacy) {
                managers.push(legacy.clone());
            }
        }
        managers
    }

    /// Get reconcile pass timeout
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Get requeue duration for missing sources
    pub fn not_found_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.not_found_requeue_secs)
    }

    /// Get reconciliation error requeue duration
    pub fn reconciliation_error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.reconciliation_error_requeue_secs)
    }

    /// Get watch restart delay after end duration
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read environment variable, treating empty values as unset
fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
