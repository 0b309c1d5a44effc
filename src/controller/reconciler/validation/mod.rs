//! # Validation
//!
//! Structural checks on a Bundle spec. The reconciler runs them before any
//! source is read so a misconfigured Bundle never produces partial targets.

mod keys;

pub use keys::{validate_data_key, validate_source_key};

use crate::constants::RESERVED_METADATA_PREFIX;
use crate::crd::{BundleSource, BundleSpec, KeyValueTarget, ObjectKind, SourceObjectKeySelector};
use std::collections::BTreeMap;

/// Validate a Bundle spec, collecting every problem found
///
/// # Errors
///
/// Returns one message per violated rule.
pub fn validate_bundle(spec: &BundleSpec) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if spec.sources.is_empty() {
        errors.push("spec.sources must contain at least one source".to_string());
    }

    let default_ca_sources = spec
        .sources
        .iter()
        .filter(|s| matches!(s, BundleSource::UseDefaultCAs(true)))
        .count();
    if default_ca_sources > 1 {
        errors.push(format!(
            "spec.sources may use default CAs at most once, found {default_ca_sources}"
        ));
    }

    for (index, source) in spec.sources.iter().enumerate() {
        let path = format!("spec.sources[{index}]");
        match source {
            BundleSource::InLine(pem) => {
                if pem.trim().is_empty() {
                    errors.push(format!("{path}.inLine must not be empty"));
                }
            }
            BundleSource::ConfigMap(reference) => {
                validate_reference(reference, &format!("{path}.configMap"), &mut errors);
            }
            BundleSource::Secret(reference) => {
                validate_reference(reference, &format!("{path}.secret"), &mut errors);
            }
            BundleSource::UseDefaultCAs(_) => {}
        }
    }

    let target = &spec.target;
    if target.config_map.is_none() && target.secret.is_none() {
        errors.push("spec.target must configure at least one of configMap or secret".to_string());
    }

    // key -> first field that claimed it
    let mut claimed: BTreeMap<String, String> = BTreeMap::new();
    if let Some(formats) = &target.additional_formats {
        if let Some(jks) = &formats.jks {
            claim_key(&mut claimed, &jks.key, "spec.target.additionalFormats.jks.key", &mut errors);
        }
        if let Some(pkcs12) = &formats.pkcs12 {
            claim_key(
                &mut claimed,
                &pkcs12.key,
                "spec.target.additionalFormats.pkcs12.key",
                &mut errors,
            );
        }
    }

    for kind in ObjectKind::ALL {
        let Some(kv_target) = target.for_kind(kind) else {
            continue;
        };
        let path = match kind {
            ObjectKind::ConfigMap => "spec.target.configMap",
            ObjectKind::Secret => "spec.target.secret",
        };
        // Each kind is its own object, so primary keys only collide with format keys
        let mut per_kind = claimed.clone();
        claim_key(&mut per_kind, &kv_target.key, &format!("{path}.key"), &mut errors);
        validate_metadata(kv_target, path, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn claim_key(
    claimed: &mut BTreeMap<String, String>,
    key: &str,
    field: &str,
    errors: &mut Vec<String>,
) {
    if let Err(e) = validate_data_key(key, field) {
        errors.push(e);
    }
    match claimed.get(key) {
        Some(previous) => errors.push(format!("{field} '{key}' collides with {previous}")),
        None => {
            claimed.insert(key.to_string(), field.to_string());
        }
    }
}

fn validate_reference(reference: &SourceObjectKeySelector, path: &str, errors: &mut Vec<String>) {
    match (&reference.name, &reference.selector) {
        (Some(_), Some(_)) => {
            errors.push(format!("{path}: name and selector are mutually exclusive"));
        }
        (None, None) => errors.push(format!("{path}: one of name or selector is required")),
        (Some(name), None) if name.trim().is_empty() => {
            errors.push(format!("{path}.name must not be empty"));
        }
        _ => {}
    }

    match (&reference.key, reference.include_all_keys) {
        (Some(_), true) => {
            errors.push(format!("{path}: key and includeAllKeys are mutually exclusive"));
        }
        (None, false) => errors.push(format!("{path}: one of key or includeAllKeys is required")),
        (Some(key), false) => {
            if let Err(e) = validate_source_key(key, &format!("{path}.key")) {
                errors.push(e);
            }
        }
        (None, true) => {}
    }
}

fn validate_metadata(kv_target: &KeyValueTarget, path: &str, errors: &mut Vec<String>) {
    let Some(metadata) = &kv_target.metadata else {
        return;
    };
    for (kind, keys) in [("labels", &metadata.labels), ("annotations", &metadata.annotations)] {
        for key in keys.keys().filter(|k| k.starts_with(RESERVED_METADATA_PREFIX)) {
            errors.push(format!(
                "{path}.metadata.{kind} '{key}' uses the reserved prefix {RESERVED_METADATA_PREFIX}"
            ));
        }
    }
}
