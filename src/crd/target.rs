//! # Bundle Target
//!
//! Where the resolved bundle is written and in which encodings.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target descriptor of a Bundle
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleTarget {
    /// Write the bundle to a ConfigMap named after the Bundle in every matching namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<KeyValueTarget>,
    /// Write the bundle to a Secret named after the Bundle in every matching namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<KeyValueTarget>,
    /// Binary encodings written next to the PEM key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_formats: Option<AdditionalFormats>,
    /// Only namespaces matching this selector receive targets. Absent matches all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

impl BundleTarget {
    /// The target configuration for one object kind, if configured
    #[must_use]
    pub fn for_kind(&self, kind: ObjectKind) -> Option<&KeyValueTarget> {
        match kind {
            ObjectKind::ConfigMap => self.config_map.as_ref(),
            ObjectKind::Secret => self.secret.as_ref(),
        }
    }
}

/// A ConfigMap or Secret target
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyValueTarget {
    /// Key holding the PEM-encoded bundle
    pub key: String,
    /// Extra labels and annotations for the target object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TargetMetadata>,
}

/// Labels and annotations copied onto target objects
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Binary encodings of the bundle
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalFormats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jks: Option<JksFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkcs12: Option<Pkcs12Format>,
}

impl AdditionalFormats {
    /// Keys written by the configured formats
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        if let Some(jks) = &self.jks {
            keys.push(jks.key.as_str());
        }
        if let Some(pkcs12) = &self.pkcs12 {
            keys.push(pkcs12.key.as_str());
        }
        keys
    }
}

/// Java KeyStore output
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JksFormat {
    pub key: String,
    /// Store password. Defaults to `changeit`.
    #[serde(default = "default_jks_password")]
    pub password: String,
}

/// PKCS#12 truststore output
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pkcs12Format {
    pub key: String,
    /// Store password. Defaults to the empty string.
    #[serde(default = "default_pkcs12_password")]
    pub password: String,
}

pub fn default_jks_password() -> String {
    crate::constants::DEFAULT_JKS_PASSWORD.to_string()
}

pub fn default_pkcs12_password() -> String {
    crate::constants::DEFAULT_PKCS12_PASSWORD.to_string()
}

/// Kind of a key-value object used as a source or a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    ConfigMap,
    Secret,
}

impl ObjectKind {
    /// Both kinds, in the order targets are processed
    pub const ALL: [ObjectKind; 2] = [ObjectKind::ConfigMap, ObjectKind::Secret];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::Secret => "Secret",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
