//! # Key Validation
//!
//! ConfigMap and Secret data keys: alphanumerics, `-`, `_` and `.`, at most
//! 253 characters. Source keys may additionally contain `*` wildcards.

use regex::Regex;
use std::sync::LazyLock;

const MAX_KEY_LENGTH: usize = 253;

static DATA_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[-._a-zA-Z0-9]+$").ok());

static SOURCE_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[-._a-zA-Z0-9*]+$").ok());

/// Validate a target data key
pub fn validate_data_key(key: &str, field: &str) -> Result<(), String> {
    validate_with(&DATA_KEY, key, field)
}

/// Validate a source key, which may be a `*` wildcard pattern
pub fn validate_source_key(key: &str, field: &str) -> Result<(), String> {
    validate_with(&SOURCE_KEY, key, field)
}

fn validate_with(pattern: &LazyLock<Option<Regex>>, key: &str, field: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(format!(
            "{field} '{key}' exceeds maximum length of {MAX_KEY_LENGTH} characters (got {})",
            key.len()
        ));
    }
    match pattern.as_ref() {
        Some(re) if re.is_match(key) => Ok(()),
        Some(_) => Err(format!(
            "{field} '{key}' must consist of alphanumeric characters, '-', '_' or '.'"
        )),
        None => Err(format!("{field} could not be checked")),
    }
}
