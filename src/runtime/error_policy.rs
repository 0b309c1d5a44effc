//! # Error Policy
//!
//! Requeue timing for reconciles that returned an error.

use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::Bundle;
use crate::observability;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per Bundle, so one failing Bundle does not slow
/// the retries of another. A successful pass clears it.
pub fn handle_reconciliation_error(
    bundle: Arc<Bundle>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = bundle.name_any();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        bundle = %name,
        reason = error.reason(),
    );
    let _error_guard = error_span.enter();

    error!(error = %error, "Reconciliation error for Bundle {}", name);
    // Bundle errors are counted by reconcile itself
    if matches!(error, ReconcilerError::ReconciliationFailed(_)) {
        observability::metrics::increment_reconciliation_errors(error.reason());
    }

    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(name.clone()).or_insert_with(|| {
                BackoffState::new(ctx.config.backoff_min_secs, ctx.config.backoff_max_secs)
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (ctx.config.reconciliation_error_requeue_secs, 0)
        }
    };

    info!(
        "Retrying Bundle {} in {}s (error count: {}, trigger source: error-backoff)",
        name, backoff_seconds, error_count
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}
