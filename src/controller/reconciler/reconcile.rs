//! # Reconcile
//!
//! One pass over a Bundle: validate, resolve sources, encode additional
//! formats, sync targets, then record the outcome in the `Synced` condition.
//!
//! `BundleEngine` holds everything up to the sync and talks to the cluster
//! only through the store traits. `reconcile` wraps it with the timeout,
//! status update and requeue policy for the kube-runtime controller.

use crate::config::ControllerConfig;
use crate::controller::clock::Clock;
use crate::controller::error::BundleError;
use crate::controller::package::DefaultPackage;
use crate::controller::reconciler::events::{actions, reasons, EventPublisher};
use crate::controller::reconciler::formats::encode_additional_formats;
use crate::controller::reconciler::source::{
    target_hash, ResolvedBundle, SourceResolver, SourceStore,
};
use crate::controller::reconciler::status::next_status;
use crate::controller::reconciler::target::{
    SyncReport, TargetAction, TargetStore, TargetSynchronizer,
};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::reconciler::validation::validate_bundle;
use crate::crd::{Bundle, ObjectKind};
use crate::observability;
use anyhow::{anyhow, Context};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Result of a successful pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub resolved: ResolvedBundle,
    pub report: SyncReport,
}

/// Resolve, encode and sync a Bundle
#[derive(Clone)]
pub struct BundleEngine {
    resolver: SourceResolver,
    synchronizer: TargetSynchronizer,
    events: Arc<dyn EventPublisher>,
    secret_targets_enabled: bool,
}

impl std::fmt::Debug for BundleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleEngine")
            .field("resolver", &self.resolver)
            .field("synchronizer", &self.synchronizer)
            .field("secret_targets_enabled", &self.secret_targets_enabled)
            .finish_non_exhaustive()
    }
}

impl BundleEngine {
    /// Wire the resolver and synchronizer from controller settings
    pub fn from_config(
        config: &ControllerConfig,
        sources: Arc<dyn SourceStore>,
        targets: Arc<dyn TargetStore>,
        events: Arc<dyn EventPublisher>,
        default_package: Option<Arc<DefaultPackage>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = SourceResolver::new(sources, config.trust_namespace.clone())
            .with_default_package(default_package)
            .with_filter_expired(config.filter_expired_certificates)
            .with_clock(clock);

        let kinds: &[ObjectKind] = if config.secret_targets_enabled {
            &ObjectKind::ALL
        } else {
            &[ObjectKind::ConfigMap]
        };
        let synchronizer =
            TargetSynchronizer::new(targets, Arc::clone(&events), config.field_manager.clone())
                .with_legacy_field_managers(config.legacy_field_managers())
                .with_max_concurrent_writes(config.max_concurrent_target_writes)
                .with_kinds(kinds);

        Self {
            resolver,
            synchronizer,
            events,
            secret_targets_enabled: config.secret_targets_enabled,
        }
    }

    /// Run one pass over `bundle`
    ///
    /// Nothing is written unless validation and resolution succeed.
    ///
    /// # Errors
    ///
    /// Any `BundleError`; see [`BundleError::reason`] for the condition
    /// reason each one maps to.
    pub async fn run(&self, bundle: &Bundle) -> Result<SyncOutcome, BundleError> {
        let result = self.pass(bundle).await;
        if let Err(error) = &result {
            self.events
                .publish(
                    &bundle.object_ref(&()),
                    EventType::Warning,
                    reasons::SYNC_FAILED,
                    actions::RECONCILE,
                    Some(format!("{}: {error}", error.reason())),
                )
                .await;
        }
        result
    }

    async fn pass(&self, bundle: &Bundle) -> Result<SyncOutcome, BundleError> {
        validate_bundle(&bundle.spec).map_err(BundleError::InvalidSpec)?;

        if bundle.spec.target.secret.is_some() && !self.secret_targets_enabled {
            return Err(BundleError::SecretTargetsDisabled);
        }

        let formats = bundle.spec.target.additional_formats.as_ref();
        let mut resolved = self.resolver.resolve(&bundle.spec).await?;
        resolved.binary_data = encode_additional_formats(&resolved.data, formats)?;
        // a password-only change must still re-encode every target
        resolved.hash = target_hash(&resolved.data, formats);
        debug!(
            certificates = resolved.certificate_count,
            hash = %resolved.hash,
            formats = resolved.binary_data.len(),
            "resolved bundle"
        );

        let report = self.synchronizer.sync(bundle, &resolved).await?;

        if report.changed() {
            self.events
                .publish(
                    &bundle.object_ref(&()),
                    EventType::Normal,
                    reasons::SYNCED,
                    actions::SYNC_TARGET,
                    Some(describe_changes(&report, resolved.certificate_count)),
                )
                .await;
        }

        Ok(SyncOutcome { resolved, report })
    }
}

fn describe_changes(report: &SyncReport, certificates: usize) -> String {
    let parts: Vec<String> = [
        TargetAction::Created,
        TargetAction::Updated,
        TargetAction::Migrated,
        TargetAction::Deleted,
    ]
    .into_iter()
    .filter_map(|action| match report.count(action) {
        0 => None,
        n => Some(format!("{} {n}", action.as_str())),
    })
    .collect();
    format!(
        "Synced {certificates} certificate(s) to targets: {}",
        parts.join(", ")
    )
}

/// Reconcile one Bundle for the kube-runtime controller
///
/// Missing sources requeue after a short delay, configuration errors wait for
/// the next change, and everything else goes to the error policy for backoff.
///
/// # Errors
///
/// Target write and API failures, and status update failures.
pub async fn reconcile(
    bundle: Arc<Bundle>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = bundle.name_any();
    let span = info_span!(
        "bundle.reconcile",
        bundle = %name,
        generation = bundle.metadata.generation.unwrap_or(0)
    );
    reconcile_bundle(bundle, ctx).instrument(span).await
}

async fn reconcile_bundle(
    bundle: Arc<Bundle>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let name = bundle.name_any();
    observability::metrics::increment_reconciliations();

    if bundle.metadata.deletion_timestamp.is_some() {
        // Targets carry owner references, garbage collection removes them
        debug!("Bundle is being deleted, skipping");
        observability::metrics::remove_bundle_certificates(&name);
        return Ok(Action::await_change());
    }

    let timeout = ctx.config.reconcile_timeout();
    let result = match tokio::time::timeout(timeout, ctx.engine.run(&bundle)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(BundleError::Store(anyhow!(
            "reconcile pass timed out after {}s",
            timeout.as_secs()
        ))),
    };

    if let Some(status) = next_status(
        bundle.status.as_ref(),
        bundle.metadata.generation,
        &result,
        ctx.clock.now(),
    ) {
        let api: Api<Bundle> = Api::all(ctx.client.clone());
        // null clears a package version that is no longer used
        let patch = serde_json::json!({
            "status": {
                "conditions": status.conditions,
                "defaultCAPackageVersion": status.default_ca_package_version,
            }
        });
        api.patch_status(
            &name,
            &PatchParams::apply(&ctx.config.field_manager),
            &Patch::Merge(patch),
        )
        .await
        .with_context(|| format!("Failed to update status of Bundle {name}"))?;
    } else {
        debug!("Synced condition unchanged, skipping status update");
    }

    observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => {
            ctx.reset_backoff(&name);
            observability::metrics::set_bundle_certificates(
                &name,
                outcome.resolved.certificate_count,
            );
            if outcome.report.changed() {
                info!(
                    certificates = outcome.resolved.certificate_count,
                    created = outcome.report.count(TargetAction::Created),
                    updated = outcome.report.count(TargetAction::Updated),
                    migrated = outcome.report.count(TargetAction::Migrated),
                    deleted = outcome.report.count(TargetAction::Deleted),
                    not_owned = outcome.report.count(TargetAction::NotOwned),
                    "Bundle synced"
                );
            } else {
                debug!(
                    targets = outcome.report.outcomes.len(),
                    "Bundle targets up to date"
                );
            }
            Ok(Action::await_change())
        }
        Err(error) => {
            observability::metrics::increment_reconciliation_errors(error.reason());
            match error {
                BundleError::NotFound(_) => {
                    warn!(error = %error, "Bundle source not found, requeueing");
                    observability::metrics::increment_requeues_total("not-found");
                    Ok(Action::requeue(ctx.config.not_found_requeue_duration()))
                }
                e if e.is_terminal() => {
                    warn!(
                        reason = e.reason(),
                        error = %e,
                        "Bundle cannot be synced until it changes"
                    );
                    Ok(Action::await_change())
                }
                e => Err(ReconcilerError::Bundle(e)),
            }
        }
    }
}
