//! # Trust Bundle Controller
//!
//! A Kubernetes controller that assembles CA trust bundles from inline PEM,
//! ConfigMaps, Secrets and a default CA package, and distributes them as
//! ConfigMaps and Secrets to every selected namespace.
//!
//! ## Overview
//!
//! For each cluster-scoped `Bundle` the controller:
//!
//! 1. **Resolves sources** in declaration order into one canonical PEM bundle
//! 2. **Encodes truststores** in JKS and PKCS#12 format when requested
//! 3. **Syncs targets** with server-side apply, never overwriting objects it does not own
//! 4. **Reports status** through a `Synced` condition
//!
//! Configuration comes from environment variables, see `ControllerConfig`.

use anyhow::Result;
use trust_bundle_controller::runtime::{initialization, watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialization::initialize().await?;
    watch_loop::run_watch_loop(init.client, init.reconciler, init.server_state).await;
    Ok(())
}
