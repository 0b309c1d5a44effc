//! # Watch Loop
//!
//! Runs the kube-runtime controller over Bundles.
//!
//! Besides the Bundles themselves, a pass is triggered by:
//! - owned ConfigMap and Secret targets (drift, deletion),
//! - Namespaces (new namespaces, label changes for `namespaceSelector`),
//! - ConfigMaps and Secrets in the trust namespace (source content).
//!
//! Namespace and source changes requeue every Bundle; reconciliation is
//! idempotent, so Bundles that are unaffected issue no writes.

use crate::config::ControllerConfig;
use crate::constants::BUNDLE_LABEL_KEY;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Bundle;
use crate::runtime::error_policy::handle_reconciliation_error;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::api::Api;
use kube::runtime::controller::{Controller, Error as ControllerError};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher;
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Every known Bundle, for triggers that may affect any of them
fn all_bundles(store: &Store<Bundle>) -> Vec<ObjectRef<Bundle>> {
    store
        .state()
        .iter()
        .map(|bundle| ObjectRef::from_obj(bundle.as_ref()))
        .collect()
}

fn build_controller(client: &Client, config: &ControllerConfig) -> Controller<Bundle> {
    let bundles: Api<Bundle> = Api::all(client.clone());
    let owned = || watcher::Config::default().labels(BUNDLE_LABEL_KEY);

    let mut controller = Controller::new(bundles, watcher::Config::default())
        .owns(Api::<ConfigMap>::all(client.clone()), owned());
    if config.secret_targets_enabled {
        controller = controller.owns(Api::<Secret>::all(client.clone()), owned());
    }

    let store = controller.store();
    let namespace_store = store.clone();
    controller = controller.watches(
        Api::<Namespace>::all(client.clone()),
        watcher::Config::default(),
        move |_: Namespace| all_bundles(&namespace_store),
    );

    let source_store = store.clone();
    controller = controller.watches(
        Api::<ConfigMap>::namespaced(client.clone(), &config.trust_namespace),
        watcher::Config::default(),
        move |_: ConfigMap| all_bundles(&source_store),
    );

    // Secret sources are readable even when Secret targets are disabled
    controller.watches(
        Api::<Secret>::namespaced(client.clone(), &config.trust_namespace),
        watcher::Config::default(),
        move |_: Secret| all_bundles(&store),
    )
}

/// Run the controller watch loop
///
/// The controller is rebuilt if its stream ends, until a shutdown signal
/// marks the server as not ready.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) {
    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        info!(
            trust_namespace = %reconciler.config.trust_namespace,
            secret_targets = reconciler.config.secret_targets_enabled,
            "Starting controller watch loop..."
        );

        build_controller(&client, &reconciler.config)
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .for_each(|result| async move {
                match result {
                    Ok((obj_ref, action)) => {
                        debug!(bundle = %obj_ref.name, ?action, "reconciled");
                    }
                    // Already logged with backoff details by the error policy
                    Err(ControllerError::ReconcilerFailed(_, obj_ref)) => {
                        debug!(bundle = %obj_ref.name, "reconcile failed");
                    }
                    Err(ControllerError::ObjectNotFound(obj_ref)) => {
                        debug!(bundle = %obj_ref.name, "Bundle no longer exists");
                    }
                    Err(e) => warn!(error = %e, "Controller stream error"),
                }
            })
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = reconciler.config.watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    info!("Controller stopped gracefully");
}
