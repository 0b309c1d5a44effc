//! # Source Resolver
//!
//! Resolves the ordered `spec.sources` of a Bundle into one canonical PEM
//! bundle.
//!
//! Each source is fetched and sanitized on its own, then the per-source
//! results are trimmed and joined with a single newline in declaration
//! order. The concatenation is not sanitized again. The first missing
//! object or key aborts resolution with `NotFound`.

use crate::controller::clock::{Clock, SystemClock};
use crate::controller::error::BundleError;
use crate::controller::package::DefaultPackage;
use crate::controller::pem::{sanitize, SanitizeOptions};
use crate::crd::{AdditionalFormats, BundleSource, BundleSpec, ObjectKind, SourceObjectKeySelector};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A ConfigMap or Secret reduced to its name and data
///
/// ConfigMap `data` and `binaryData` are merged into one map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyValueObject {
    pub name: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

/// Read access to source objects
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Fetch one object, `None` if it does not exist
    async fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KeyValueObject>>;

    /// List objects matching a label selector, in any order
    async fn list(
        &self,
        kind: ObjectKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<KeyValueObject>>;
}

/// Output of one resolve pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBundle {
    /// Canonical PEM bundle
    pub data: String,
    /// sha256 hex digest of `data`
    pub hash: String,
    pub certificate_count: usize,
    /// Encoded additional formats, keyed by target key
    pub binary_data: BTreeMap<String, Vec<u8>>,
    /// Identity of the default package, when a source used it
    pub default_package: Option<String>,
}

impl ResolvedBundle {
    #[must_use]
    pub fn new(data: String, default_package: Option<String>) -> Self {
        let hash = bundle_hash(&data);
        let certificate_count = data.matches("-----BEGIN CERTIFICATE-----").count();
        Self {
            data,
            hash,
            certificate_count,
            binary_data: BTreeMap::new(),
            default_package,
        }
    }
}

/// sha256 hex digest of a canonical bundle
#[must_use]
pub fn bundle_hash(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Hash written to targets: the bundle plus the password of each binary format
///
/// Equal to [`bundle_hash`] when no additional format is configured.
#[must_use]
pub fn target_hash(data: &str, formats: Option<&AdditionalFormats>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    if let Some(formats) = formats {
        if let Some(jks) = &formats.jks {
            hasher.update(b"\0jks\0");
            hasher.update(jks.password.as_bytes());
        }
        if let Some(pkcs12) = &formats.pkcs12 {
            hasher.update(b"\0pkcs12\0");
            hasher.update(pkcs12.password.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Which objects a reference points at
#[derive(Debug)]
enum ObjectMatch<'a> {
    Named(&'a str),
    Selected(&'a LabelSelector),
}

impl<'a> ObjectMatch<'a> {
    fn from_selector(selector: &'a SourceObjectKeySelector) -> Result<Self, BundleError> {
        match (&selector.name, &selector.selector) {
            (Some(name), None) => Ok(ObjectMatch::Named(name)),
            (None, Some(label_selector)) => Ok(ObjectMatch::Selected(label_selector)),
            (Some(_), Some(_)) => Err(BundleError::InvalidSpec(vec![
                "name and selector are mutually exclusive".to_string(),
            ])),
            (None, None) => Err(BundleError::InvalidSpec(vec![
                "one of name or selector must be set".to_string(),
            ])),
        }
    }
}

/// Which keys of a matched object are read
#[derive(Debug)]
enum KeyMatch<'a> {
    Key(&'a str),
    Pattern(Regex),
    AllKeys,
}

impl<'a> KeyMatch<'a> {
    fn from_selector(selector: &'a SourceObjectKeySelector) -> Result<Self, BundleError> {
        match (&selector.key, selector.include_all_keys) {
            (None, true) => Ok(KeyMatch::AllKeys),
            (Some(key), false) if key.contains('*') => Ok(KeyMatch::Pattern(wildcard(key)?)),
            (Some(key), false) => Ok(KeyMatch::Key(key)),
            (Some(_), true) => Err(BundleError::InvalidSpec(vec![
                "key and includeAllKeys are mutually exclusive".to_string(),
            ])),
            (None, false) => Err(BundleError::InvalidSpec(vec![
                "one of key or includeAllKeys must be set".to_string(),
            ])),
        }
    }

    /// Matching entries in key order
    fn select<'o>(&self, object: &'o KeyValueObject) -> Vec<(&'o str, &'o [u8])> {
        match self {
            KeyMatch::Key(key) => object
                .data
                .get_key_value(*key)
                .map(|(k, v)| (k.as_str(), v.as_slice()))
                .into_iter()
                .collect(),
            KeyMatch::Pattern(pattern) => object
                .data
                .iter()
                .filter(|(k, _)| pattern.is_match(k))
                .map(|(k, v)| (k.as_str(), v.as_slice()))
                .collect(),
            KeyMatch::AllKeys => object
                .data
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_slice()))
                .collect(),
        }
    }
}

/// Anchored regex where `*` matches any run of characters
fn wildcard(pattern: &str) -> Result<Regex, BundleError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$")).map_err(|e| {
        BundleError::InvalidSpec(vec![format!("invalid key pattern \"{pattern}\": {e}")])
    })
}

/// Resolves Bundle sources against a [`SourceStore`]
#[derive(Clone)]
pub struct SourceResolver {
    store: Arc<dyn SourceStore>,
    trust_namespace: String,
    default_package: Option<Arc<DefaultPackage>>,
    filter_expired: bool,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceResolver")
            .field("trust_namespace", &self.trust_namespace)
            .field(
                "default_package",
                &self.default_package.as_ref().map(|p| p.identity()),
            )
            .field("filter_expired", &self.filter_expired)
            .finish_non_exhaustive()
    }
}

impl SourceResolver {
    pub fn new(store: Arc<dyn SourceStore>, trust_namespace: impl Into<String>) -> Self {
        Self {
            store,
            trust_namespace: trust_namespace.into(),
            default_package: None,
            filter_expired: false,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_default_package(mut self, package: Option<Arc<DefaultPackage>>) -> Self {
        self.default_package = package;
        self
    }

    #[must_use]
    pub fn with_filter_expired(mut self, filter_expired: bool) -> Self {
        self.filter_expired = filter_expired;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn trust_namespace(&self) -> &str {
        &self.trust_namespace
    }

    /// Resolve every source into the canonical bundle
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing object or key, `InvalidCertificate` or
    /// `EmptyBundle` for bad source data, `NoDefaultPackage` when the default
    /// package is requested but was never loaded, and `Store` for API failures.
    pub async fn resolve(&self, spec: &BundleSpec) -> Result<ResolvedBundle, BundleError> {
        let options = if self.filter_expired {
            SanitizeOptions::filter_expired_at(self.clock.now())
        } else {
            SanitizeOptions::keep_expired()
        };

        let mut parts: Vec<String> = Vec::new();
        let mut default_package = None;

        for (index, source) in spec.sources.iter().enumerate() {
            let label = format!("source {} ({})", index + 1, source.describe());

            let resolved = self
                .resolve_source(source, &options, &mut default_package)
                .await
                .map_err(|e| e.in_source(&label))?;

            debug!(source = %label, parts = resolved.len(), "resolved source");
            parts.extend(resolved);
        }

        if parts.is_empty() {
            return Err(BundleError::EmptyBundle(
                "no source produced any certificates".to_string(),
            ));
        }

        let data = parts
            .iter()
            .map(|part| part.trim())
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";

        Ok(ResolvedBundle::new(data, default_package))
    }

    async fn resolve_source(
        &self,
        source: &BundleSource,
        options: &SanitizeOptions,
        default_package: &mut Option<String>,
    ) -> Result<Vec<String>, BundleError> {
        match source {
            BundleSource::InLine(data) => Ok(vec![sanitize(data, options)?]),
            BundleSource::ConfigMap(selector) => {
                self.resolve_reference(ObjectKind::ConfigMap, selector, options)
                    .await
            }
            BundleSource::Secret(selector) => {
                self.resolve_reference(ObjectKind::Secret, selector, options)
                    .await
            }
            BundleSource::UseDefaultCAs(false) => Ok(Vec::new()),
            BundleSource::UseDefaultCAs(true) => {
                let package = self
                    .default_package
                    .as_ref()
                    .ok_or(BundleError::NoDefaultPackage)?;
                *default_package = Some(package.identity());
                Ok(vec![sanitize(&package.bundle, options)?])
            }
        }
    }

    /// Resolve a ConfigMap or Secret reference into sanitized parts
    ///
    /// Selected objects are visited in name order and keys in key order.
    async fn resolve_reference(
        &self,
        kind: ObjectKind,
        selector: &SourceObjectKeySelector,
        options: &SanitizeOptions,
    ) -> Result<Vec<String>, BundleError> {
        let object_match = ObjectMatch::from_selector(selector)?;
        let key_match = KeyMatch::from_selector(selector)?;
        let namespace = self.trust_namespace.as_str();

        let mut parts = Vec::new();

        match object_match {
            ObjectMatch::Named(name) => {
                let object = self
                    .store
                    .get(kind, namespace, name)
                    .await?
                    .ok_or_else(|| {
                        BundleError::NotFound(format!("{kind} \"{namespace}/{name}\""))
                    })?;

                let entries = key_match.select(&object);
                if entries.is_empty() && !matches!(key_match, KeyMatch::AllKeys) {
                    return Err(BundleError::NotFound(format!(
                        "{} in {kind} \"{namespace}/{name}\"",
                        describe_keys(selector)
                    )));
                }
                for (_, value) in entries {
                    parts.push(sanitize(value, options)?);
                }
            }
            ObjectMatch::Selected(label_selector) => {
                let mut objects = self.store.list(kind, namespace, label_selector).await?;
                objects.sort_by(|a, b| a.name.cmp(&b.name));

                for object in &objects {
                    let entries = key_match.select(object);
                    if entries.is_empty() {
                        if let KeyMatch::Key(_) = key_match {
                            return Err(BundleError::NotFound(format!(
                                "{} in {kind} \"{namespace}/{}\"",
                                describe_keys(selector),
                                object.name
                            )));
                        }
                        continue;
                    }
                    for (_, value) in entries {
                        parts.push(sanitize(value, options)?);
                    }
                }

                if objects.is_empty() {
                    debug!(%kind, namespace, "label selector matched no source objects");
                }
            }
        }

        Ok(parts)
    }
}

fn describe_keys(selector: &SourceObjectKeySelector) -> String {
    match &selector.key {
        Some(key) => format!("key \"{key}\""),
        None => "keys".to_string(),
    }
}
