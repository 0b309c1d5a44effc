//! # Default CA Package
//!
//! The default package is a JSON document `{name, version, bundle}` shipped
//! alongside the controller (usually a distribution's public CA set). It is
//! loaded once at startup and is immutable for the lifetime of the process.

use crate::controller::pem::{sanitize, SanitizeOptions};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// A loaded and sanitized default CA package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultPackage {
    pub name: String,
    pub version: String,
    /// Sanitized PEM bundle
    pub bundle: String,
}

#[derive(Debug, Deserialize)]
struct PackageDocument {
    name: String,
    version: String,
    bundle: String,
}

impl DefaultPackage {
    /// Parse and sanitize a package document
    ///
    /// Expired certificates are never filtered here; filtering happens per
    /// reconcile so that a long-running process drops them as they expire.
    ///
    /// # Errors
    ///
    /// Fails when the document is not valid JSON, misses a field, or its
    /// bundle does not sanitize.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let doc: PackageDocument =
            serde_json::from_slice(data).context("default CA package is not valid JSON")?;

        if doc.name.trim().is_empty() || doc.version.trim().is_empty() {
            anyhow::bail!("default CA package must have a non-empty name and version");
        }

        let bundle = sanitize(&doc.bundle, &SanitizeOptions::keep_expired())
            .context("default CA package bundle is invalid")?;

        Ok(Self {
            name: doc.name,
            version: doc.version,
            bundle,
        })
    }

    /// Identity recorded in Bundle status, `name:version`
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

/// Load the default package from disk
///
/// # Errors
///
/// Fails when the file cannot be read or [`DefaultPackage::from_json`] fails.
pub async fn load_default_package(path: &Path) -> Result<DefaultPackage> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read default CA package {}", path.display()))?;

    let package = DefaultPackage::from_json(&data)
        .with_context(|| format!("failed to load default CA package {}", path.display()))?;

    info!(
        package = %package.identity(),
        path = %path.display(),
        "loaded default CA package"
    );

    Ok(package)
}
