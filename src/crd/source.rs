//! # Bundle Sources
//!
//! Source descriptors. Each entry in `spec.sources` is exactly one variant.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde::{Deserialize, Serialize};

/// A single place to read CA certificates from
///
/// Serialized as a single-key object, for example `{"inLine": "..."}` or
/// `{"configMap": {"name": "ca", "key": "ca.crt"}}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum BundleSource {
    /// Literal PEM data
    InLine(String),
    /// ConfigMap(s) in the trust namespace
    ConfigMap(SourceObjectKeySelector),
    /// Secret(s) in the trust namespace
    Secret(SourceObjectKeySelector),
    /// The default CA package loaded at startup
    #[serde(rename = "useDefaultCAs")]
    UseDefaultCAs(bool),
}

impl BundleSource {
    /// Short description used in logs and error messages
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            BundleSource::InLine(_) => "inLine".to_string(),
            BundleSource::ConfigMap(selector) => format!("configMap {}", selector.describe()),
            BundleSource::Secret(selector) => format!("secret {}", selector.describe()),
            BundleSource::UseDefaultCAs(_) => "useDefaultCAs".to_string(),
        }
    }
}

/// Reference to one named object or a label-selected set of objects, plus
/// which of their keys to read
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceObjectKeySelector {
    /// Name of a single object. Mutually exclusive with `selector`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Label selector matching any number of objects. Mutually exclusive with `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    /// Key to read. May contain `*` wildcards. Mutually exclusive with `includeAllKeys`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Read every key of the matched object(s)
    #[serde(default)]
    pub include_all_keys: bool,
}

impl SourceObjectKeySelector {
    fn describe(&self) -> String {
        let object = match (&self.name, &self.selector) {
            (Some(name), _) => format!("\"{name}\""),
            (None, Some(_)) => "selector".to_string(),
            (None, None) => "<unset>".to_string(),
        };
        match &self.key {
            Some(key) if !self.include_all_keys => format!("{object} key \"{key}\""),
            _ => format!("{object} all keys"),
        }
    }
}
