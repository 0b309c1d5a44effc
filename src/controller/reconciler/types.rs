//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::clock::{Clock, SystemClock};
use crate::controller::error::BundleError;
use crate::controller::package::load_default_package;
use crate::controller::reconciler::client::KubeStore;
use crate::controller::reconciler::events::KubeEventPublisher;
use crate::controller::reconciler::reconcile::BundleEngine;
use crate::controller::reconciler::source::SourceStore;
use anyhow::{Context, Result};
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0:#}")]
    ReconciliationFailed(#[from] anyhow::Error),
    #[error(transparent)]
    Bundle(#[from] BundleError),
}

impl ReconcilerError {
    /// Condition-style reason, used as a metric label
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcilerError::ReconciliationFailed(_) => "APIError",
            ReconcilerError::Bundle(e) => e.reason(),
        }
    }
}

/// Backoff state for a specific Bundle
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context handed to every reconcile
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub config: ControllerConfig,
    pub engine: BundleEngine,
    pub clock: Arc<dyn Clock>,
    /// Backoff state per Bundle name, owned by the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Build the reconciler, loading the default CA package if configured
    ///
    /// # Errors
    ///
    /// Fails if a configured default package cannot be read or is invalid.
    pub async fn new(client: Client, config: ControllerConfig) -> Result<Self> {
        let default_package = match &config.default_package_location {
            Some(path) => {
                let package = load_default_package(path).await.with_context(|| {
                    format!("Failed to load default CA package from {}", path.display())
                })?;
                Some(Arc::new(package))
            }
            None => {
                info!("No default CA package configured, useDefaultCAs sources will fail");
                None
            }
        };

        if !config.secret_targets_enabled {
            info!("Secret targets disabled, Bundles with a secret target will not be synced");
        }

        let store = Arc::new(KubeStore::new(client.clone()));
        let events = Arc::new(KubeEventPublisher::new(client.clone(), &config.field_manager));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let engine = BundleEngine::from_config(
            &config,
            Arc::clone(&store) as Arc<dyn SourceStore>,
            store,
            events,
            default_package,
            Arc::clone(&clock),
        );

        Ok(Self {
            client,
            config,
            engine,
            clock,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Forget the error backoff of a Bundle after a successful pass
    pub fn reset_backoff(&self, name: &str) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                states.remove(name);
            }
            Err(e) => warn!("Failed to lock backoff_states: {}", e),
        }
    }
}
