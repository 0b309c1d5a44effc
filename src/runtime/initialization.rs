//! # Initialization
//!
//! Controller startup: rustls setup, tracing, metrics, server startup,
//! Kubernetes client and reconciler construction.

use crate::config::ControllerConfig;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::Bundle;
use crate::observability;
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn init_tracing(log_format: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "trust_bundle_controller=info".into())
    };
    let result = if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).try_init()
    };
    if let Err(e) = result {
        warn!("Tracing subscriber init returned error (may already be initialized): {}", e);
    }
}

/// Initialize the controller runtime
///
/// # Errors
///
/// Fails if metrics cannot be registered, the HTTP server does not come up,
/// no Kubernetes client can be built, or the default CA package is invalid.
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any rustls client is built
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let config = ControllerConfig::from_env();
    init_tracing(&config.log_format);
    if !provider_installed {
        debug!("rustls crypto provider was already installed");
    }

    info!("Starting Trust Bundle Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(?config, "Loaded controller configuration");

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());

    let server_port = config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(&server_state, &server_handle, &config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    check_bundles_queryable(&client).await;

    let reconciler = Arc::new(Reconciler::new(client.clone(), config).await?);

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ControllerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.server_startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.server_poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        // Set by start_server once bound
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Log how many Bundles exist, or warn if the CRD is not installed
///
/// The controller keeps starting either way; the watch retries until the
/// CRD appears.
async fn check_bundles_queryable(client: &Client) {
    let bundles: Api<Bundle> = Api::all(client.clone());
    match bundles.list(&ListParams::default()).await {
        Ok(list) => {
            let mut names: Vec<String> = list
                .items
                .iter()
                .filter_map(|b| b.metadata.name.clone())
                .collect();
            names.sort();
            info!(
                "CRD is queryable, found {} existing Bundle resources{}",
                names.len(),
                if names.is_empty() {
                    String::new()
                } else if names.len() <= 3 {
                    format!(": {}", names.join(", "))
                } else {
                    format!(": {}, ... ({} total)", names[..3].join(", "), names.len())
                }
            );
        }
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - controller will retry");
        }
    }
}
