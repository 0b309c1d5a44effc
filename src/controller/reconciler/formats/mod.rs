//! # Format Encoder
//!
//! Encodes the canonical PEM bundle into binary truststores.
//!
//! - `jks.rs` - Java KeyStore (JKS v2) writer
//! - `pkcs12.rs` - PKCS#12 truststore
//!
//! Both formats hold one trusted-certificate entry per certificate, in the
//! order the certificates appear in the bundle. Identical certificates
//! collapse into one entry.

mod jks;
mod pkcs12;

pub use jks::encode_jks;
pub use pkcs12::encode_pkcs12;

use crate::controller::error::BundleError;
use crate::controller::pem::decode_certificates;
use crate::crd::AdditionalFormats;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use x509_parser::prelude::*;

/// A certificate ready to be stored as a truststore entry
#[derive(Debug, Clone)]
pub(crate) struct CertificateEntry {
    pub alias: String,
    pub der: Vec<u8>,
    /// NotBefore in unix milliseconds, clamped at zero
    pub not_before_millis: u64,
}

/// Stable alias for a certificate: first 8 hex chars of its sha256, `|`, subject
///
/// Rotated CAs that share a subject get distinct aliases, and the same
/// certificate always gets the same alias.
///
/// # Errors
///
/// Returns `Encoding` if `der` is not a certificate.
pub fn certificate_alias(der: &[u8]) -> Result<String, BundleError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| BundleError::Encoding(format!("failed to parse certificate: {e}")))?;
    Ok(alias_for(der, &cert))
}

fn alias_for(der: &[u8], cert: &X509Certificate<'_>) -> String {
    let digest = hex::encode(Sha256::digest(der));
    format!("{}|{}", &digest[..8], cert.subject())
}

/// Certificates of a canonical bundle as truststore entries
pub(crate) fn certificate_entries(bundle: &str) -> Result<Vec<CertificateEntry>, BundleError> {
    let ders = decode_certificates(bundle).map_err(|e| BundleError::Encoding(e.to_string()))?;

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(ders.len());

    for der in ders {
        let (alias, not_before) = {
            let (_, cert) = X509Certificate::from_der(&der)
                .map_err(|e| BundleError::Encoding(format!("failed to parse certificate: {e}")))?;
            (
                alias_for(&der, &cert),
                cert.validity().not_before.timestamp(),
            )
        };

        if !seen.insert(alias.clone()) {
            continue;
        }

        entries.push(CertificateEntry {
            alias,
            der,
            not_before_millis: u64::try_from(not_before.saturating_mul(1000)).unwrap_or(0),
        });
    }

    Ok(entries)
}

/// Encode every configured additional format, keyed by its target key
///
/// # Errors
///
/// Returns `Encoding` if any format fails.
pub fn encode_additional_formats(
    bundle: &str,
    formats: Option<&AdditionalFormats>,
) -> Result<BTreeMap<String, Vec<u8>>, BundleError> {
    let mut encoded = BTreeMap::new();
    let Some(formats) = formats else {
        return Ok(encoded);
    };

    if let Some(jks) = &formats.jks {
        encoded.insert(jks.key.clone(), encode_jks(bundle, &jks.password)?);
    }
    if let Some(pkcs12) = &formats.pkcs12 {
        encoded.insert(pkcs12.key.clone(), encode_pkcs12(bundle, &pkcs12.password)?);
    }

    Ok(encoded)
}
