//! # Bundle Spec
//!
//! The cluster-scoped `Bundle` resource.

use serde::{Deserialize, Serialize};

/// Bundle Custom Resource Definition
///
/// A Bundle declares an ordered list of CA certificate sources and where the
/// resolved bundle is written. Every matching namespace receives a ConfigMap
/// and/or Secret named after the Bundle.
///
/// # Example
///
/// ```yaml
/// apiVersion: trust.microscaler.io/v1alpha1
/// kind: Bundle
/// metadata:
///   name: example-bundle
/// spec:
///   sources:
///     - useDefaultCAs: true
///     - configMap:
///         name: my-root-ca
///         key: root.pem
///     - inLine: |
///         -----BEGIN CERTIFICATE-----
///         ...
///         -----END CERTIFICATE-----
///   target:
///     configMap:
///       key: ca-bundle.crt
///     additionalFormats:
///       jks:
///         key: bundle.jks
///     namespaceSelector:
///       matchLabels:
///         trust: enabled
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "Bundle",
    group = "trust.microscaler.io",
    version = "v1alpha1",
    status = "crate::crd::BundleStatus",
    shortname = "bundle",
    printcolumn = r#"{"name":"ConfigMap Target", "type":"string", "jsonPath":".spec.target.configMap.key"}, {"name":"Secret Target", "type":"string", "jsonPath":".spec.target.secret.key"}, {"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Synced\")].status"}, {"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Synced\")].reason"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// Sources is an ordered list of places to read CA certificates from.
    /// They are concatenated in this order into the canonical bundle.
    pub sources: Vec<crate::crd::BundleSource>,
    /// Target is where the resolved bundle is written
    pub target: crate::crd::BundleTarget,
}
