//! # Configuration
//!
//! Process-level settings for the controller, loaded once at startup.

mod controller;

pub use controller::ControllerConfig;
