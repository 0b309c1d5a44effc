//! # PEM Sanitizer
//!
//! Validates and normalizes PEM input into a clean sequence of certificate
//! blocks.
//!
//! Every PEM block must be a `CERTIFICATE` that parses as X.509. Text outside
//! blocks, blank lines and PEM headers are discarded. The output uses LF line
//! endings, has no blank lines between blocks and ends with exactly one
//! newline.

use crate::controller::error::BundleError;
use chrono::{DateTime, Utc};
use pem::{EncodeConfig, LineEnding, Pem};
use tracing::debug;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Sanitizer options
#[derive(Debug, Clone, Copy)]
pub struct SanitizeOptions {
    /// Silently drop certificates whose NotAfter is before `now`
    pub filter_expired: bool,
    pub now: DateTime<Utc>,
}

impl SanitizeOptions {
    /// Keep every certificate regardless of expiry
    #[must_use]
    pub fn keep_expired() -> Self {
        Self {
            filter_expired: false,
            now: Utc::now(),
        }
    }

    /// Drop certificates that expired before `now`
    #[must_use]
    pub fn filter_expired_at(now: DateTime<Utc>) -> Self {
        Self {
            filter_expired: true,
            now,
        }
    }
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self::keep_expired()
    }
}

/// Validate and normalize a blob of PEM certificates
///
/// # Errors
///
/// - `InvalidCertificate` if a block is malformed, is not a `CERTIFICATE`
///   block, or does not parse as X.509
/// - `EmptyBundle` if no certificate remains
pub fn sanitize(raw: impl AsRef<[u8]>, options: &SanitizeOptions) -> Result<String, BundleError> {
    let raw = raw.as_ref();
    check_block_markers(raw)?;
    let blocks = pem::parse_many(raw)
        .map_err(|e| BundleError::InvalidCertificate(format!("malformed PEM data: {e}")))?;

    let mut out = String::new();
    let mut dropped = 0usize;

    for (index, block) in blocks.iter().enumerate() {
        let not_after = parse_certificate_block(index, block)?;

        if options.filter_expired && not_after < options.now.timestamp() {
            dropped += 1;
            continue;
        }

        out.push_str(&pem::encode_config(
            &Pem::new(CERTIFICATE_TAG, block.contents()),
            EncodeConfig::new().set_line_ending(LineEnding::LF),
        ));
    }

    if dropped > 0 {
        debug!(dropped, "filtered expired certificates");
    }

    if out.is_empty() {
        return Err(BundleError::EmptyBundle(
            "no valid certificates found".to_string(),
        ));
    }

    // encode_config terminates every block with a newline already
    Ok(out)
}

/// Every BEGIN line must be closed by an END line before the next BEGIN
///
/// `parse_many` skips an unterminated block instead of failing.
fn check_block_markers(raw: &[u8]) -> Result<(), BundleError> {
    let mut open = false;
    let mut blocks = 0usize;
    for line in String::from_utf8_lossy(raw).lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN ") {
            if open {
                break;
            }
            open = true;
            blocks += 1;
        } else if line.starts_with("-----END ") {
            if !open {
                return Err(BundleError::InvalidCertificate(format!(
                    "END line without BEGIN after PEM block {blocks}"
                )));
            }
            open = false;
        }
    }
    if open {
        return Err(BundleError::InvalidCertificate(format!(
            "PEM block {blocks} has no END line"
        )));
    }
    Ok(())
}

/// DER bytes of every certificate in an already-sanitized bundle, in order
///
/// # Errors
///
/// Same failure modes as [`sanitize`]; sanitized input never fails.
pub fn decode_certificates(bundle: &str) -> Result<Vec<Vec<u8>>, BundleError> {
    let blocks = pem::parse_many(bundle.as_bytes())
        .map_err(|e| BundleError::InvalidCertificate(format!("malformed PEM data: {e}")))?;

    blocks
        .into_iter()
        .enumerate()
        .map(|(index, block)| {
            parse_certificate_block(index, &block)?;
            Ok(block.into_contents())
        })
        .collect()
}

/// Check one block and return its NotAfter as a unix timestamp
fn parse_certificate_block(index: usize, block: &Pem) -> Result<i64, BundleError> {
    if block.tag() != CERTIFICATE_TAG {
        return Err(BundleError::InvalidCertificate(format!(
            "PEM block {} is a \"{}\", not a certificate",
            index + 1,
            block.tag()
        )));
    }

    let (_, cert) = X509Certificate::from_der(block.contents()).map_err(|e| {
        BundleError::InvalidCertificate(format!("PEM block {} is not valid X.509: {e}", index + 1))
    })?;

    Ok(cert.validity().not_after.timestamp())
}
