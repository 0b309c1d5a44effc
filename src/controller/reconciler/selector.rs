//! # Label Selectors
//!
//! Evaluation of `LabelSelector` against a label map, and rendering to the
//! query-string form accepted by list calls.

use crate::controller::error::BundleError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;

/// Whether `labels` satisfy `selector`
///
/// An empty selector matches everything.
///
/// # Errors
///
/// Returns `InvalidSpec` for unknown operators or `In`/`NotIn` without values.
pub fn matches(
    selector: &LabelSelector,
    labels: &BTreeMap<String, String>,
) -> Result<bool, BundleError> {
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
    }

    for requirement in selector.match_expressions.iter().flatten() {
        if !requirement_matches(requirement, labels)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn requirement_matches(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool, BundleError> {
    let value = labels.get(&requirement.key);
    let values = requirement.values.as_deref().unwrap_or_default();

    match requirement.operator.as_str() {
        "In" => {
            require_values(requirement)?;
            Ok(value.is_some_and(|v| values.contains(v)))
        }
        "NotIn" => {
            require_values(requirement)?;
            Ok(!value.is_some_and(|v| values.contains(v)))
        }
        "Exists" => Ok(value.is_some()),
        "DoesNotExist" => Ok(value.is_none()),
        other => Err(BundleError::InvalidSpec(vec![format!(
            "unsupported label selector operator \"{other}\" for key \"{}\"",
            requirement.key
        )])),
    }
}

fn require_values(requirement: &LabelSelectorRequirement) -> Result<(), BundleError> {
    if requirement.values.as_ref().is_none_or(Vec::is_empty) {
        return Err(BundleError::InvalidSpec(vec![format!(
            "label selector operator {} for key \"{}\" needs at least one value",
            requirement.operator, requirement.key
        )]));
    }
    Ok(())
}

/// Render a selector in `kubectl -l` syntax
///
/// # Errors
///
/// Same as [`matches`].
pub fn to_query(selector: &LabelSelector) -> Result<String, BundleError> {
    let mut terms = Vec::new();

    for (key, value) in selector.match_labels.iter().flatten() {
        terms.push(format!("{key}={value}"));
    }

    for requirement in selector.match_expressions.iter().flatten() {
        let key = &requirement.key;
        let term = match requirement.operator.as_str() {
            "In" | "NotIn" => {
                require_values(requirement)?;
                let values = requirement.values.as_deref().unwrap_or_default().join(",");
                let op = if requirement.operator == "In" { "in" } else { "notin" };
                format!("{key} {op} ({values})")
            }
            "Exists" => key.clone(),
            "DoesNotExist" => format!("!{key}"),
            other => {
                return Err(BundleError::InvalidSpec(vec![format!(
                    "unsupported label selector operator \"{other}\" for key \"{key}\""
                )]))
            }
        };
        terms.push(term);
    }

    Ok(terms.join(","))
}
