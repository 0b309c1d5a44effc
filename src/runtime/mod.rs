//! # Runtime
//!
//! Process startup and the controller watch loop.
//!
//! - `initialization`: tracing, metrics, HTTP server, Kubernetes client
//! - `watch_loop`: kube-runtime controller over Bundles and the objects they depend on
//! - `error_policy`: per-Bundle Fibonacci backoff for failed reconciles

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
