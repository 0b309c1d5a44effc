//! # Bundle Errors
//!
//! Error taxonomy for resolving, encoding and distributing a bundle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    /// A referenced source object or key does not exist (yet)
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("empty bundle: {0}")]
    EmptyBundle(String),

    #[error("failed to encode bundle: {0}")]
    Encoding(String),

    #[error("default CA package requested but no package was loaded")]
    NoDefaultPackage,

    #[error("invalid Bundle spec: {}", .0.join("; "))]
    InvalidSpec(Vec<String>),

    #[error("Secret targets are disabled for this controller")]
    SecretTargetsDisabled,

    #[error("failed to sync {} target(s): {}", .0.len(), .0.join("; "))]
    TargetSync(Vec<String>),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl BundleError {
    /// Reason string written to the Synced condition
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            BundleError::NotFound(_) => "SourceNotFound",
            BundleError::InvalidCertificate(_) => "InvalidCertificate",
            BundleError::EmptyBundle(_) => "EmptyBundle",
            BundleError::Encoding(_) => "EncodingFailed",
            BundleError::NoDefaultPackage => "NoDefaultPackage",
            BundleError::InvalidSpec(_) => "InvalidSpec",
            BundleError::SecretTargetsDisabled => "SecretTargetsDisabled",
            BundleError::TargetSync(_) => "SyncTargetFailed",
            BundleError::Store(_) => "APIError",
        }
    }

    /// Errors that only go away when the Bundle or its sources change
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BundleError::InvalidCertificate(_)
                | BundleError::EmptyBundle(_)
                | BundleError::Encoding(_)
                | BundleError::NoDefaultPackage
                | BundleError::InvalidSpec(_)
                | BundleError::SecretTargetsDisabled
        )
    }

    /// Prefix sanitizer errors with the source they came from
    #[must_use]
    pub fn in_source(self, source: &str) -> Self {
        match self {
            BundleError::InvalidCertificate(msg) => {
                BundleError::InvalidCertificate(format!("{source}: {msg}"))
            }
            BundleError::EmptyBundle(msg) => BundleError::EmptyBundle(format!("{source}: {msg}")),
            other => other,
        }
    }
}
