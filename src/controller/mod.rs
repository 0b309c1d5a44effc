//! # Controller
//!
//! Core controller modules for the Trust Bundle Controller.
//!
//! - `backoff`: Fibonacci backoff for failed reconciles
//! - `clock`: time source, fixed in tests
//! - `error`: `BundleError`
//! - `package`: default CA package loading
//! - `pem`: PEM certificate sanitizing
//! - `reconciler`: resolution, encoding and target sync
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod clock;
pub mod error;
pub mod package;
pub mod pem;
pub mod reconciler;
pub mod server;
