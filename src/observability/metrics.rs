//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `trust_bundle_reconciliations_total` - Total number of reconciliations
//! - `trust_bundle_reconciliation_errors_total` - Reconciliation errors by reason
//! - `trust_bundle_reconciliation_duration_seconds` - Duration of reconcile passes
//! - `trust_bundle_target_operations_total` - Target outcomes by kind and action
//! - `trust_bundle_target_errors_total` - Failed target writes by kind
//! - `trust_bundle_targets_not_owned_total` - Targets skipped because another owner holds them
//! - `trust_bundle_certificates` - Certificates in the last resolved bundle, per Bundle
//! - `trust_bundle_requeues_total` - Requeues by trigger

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trust_bundle_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "trust_bundle_reconciliation_errors_total",
            "Total number of reconciliation errors by condition reason",
        ),
        &["reason"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "trust_bundle_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static TARGET_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "trust_bundle_target_operations_total",
            "Target outcomes by kind and action",
        ),
        &["kind", "action"],
    )
    .expect("Failed to create TARGET_OPERATIONS_TOTAL metric - this should never happen")
});

static TARGET_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "trust_bundle_target_errors_total",
            "Failed target writes by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create TARGET_ERRORS_TOTAL metric - this should never happen")
});

static TARGETS_NOT_OWNED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "trust_bundle_targets_not_owned_total",
        "Targets left untouched because they are owned by something else",
    )
    .expect("Failed to create TARGETS_NOT_OWNED_TOTAL metric - this should never happen")
});

static BUNDLE_CERTIFICATES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "trust_bundle_certificates",
            "Number of certificates in the last resolved bundle",
        ),
        &["bundle"],
    )
    .expect("Failed to create BUNDLE_CERTIFICATES metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "trust_bundle_requeues_total",
            "Total number of requeues by trigger",
        ),
        &["trigger"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

/// Register all metrics with the registry
///
/// # Errors
///
/// Fails if a metric is registered twice.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(TARGET_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TARGET_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TARGETS_NOT_OWNED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BUNDLE_CERTIFICATES.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(reason: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_target_operations(kind: &str, action: &str) {
    TARGET_OPERATIONS_TOTAL
        .with_label_values(&[kind, action])
        .inc();
}

pub fn increment_target_errors(kind: &str) {
    TARGET_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_not_owned_targets() {
    TARGETS_NOT_OWNED_TOTAL.inc();
}

pub fn set_bundle_certificates(bundle: &str, count: usize) {
    BUNDLE_CERTIFICATES
        .with_label_values(&[bundle])
        .set(i64::try_from(count).unwrap_or(i64::MAX));
}

/// Drop the per-Bundle series once the Bundle is gone
pub fn remove_bundle_certificates(bundle: &str) {
    // Absent series is not an error worth reporting
    let _ = BUNDLE_CERTIFICATES.remove_label_values(&[bundle]);
}

/// Trigger values: `not-found`, `error-backoff`
pub fn increment_requeues_total(trigger: &str) {
    REQUEUES_TOTAL.with_label_values(&[trigger]).inc();
}
