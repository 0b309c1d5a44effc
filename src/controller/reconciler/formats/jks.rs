//! Java KeyStore writer.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! u32 magic 0xFEEDFEED | u32 version 2 | u32 entry count
//! per entry: u32 tag 2 (trusted certificate) | UTF alias | u64 created (ms)
//!            UTF "X.509" | u32 length | DER certificate
//! 20 byte SHA-1 over UTF-16BE(password) + "Mighty Aphrodite" + everything above
//! ```
//!
//! `UTF` is a u16 byte length followed by the string bytes.

use super::certificate_entries;
use crate::controller::error::BundleError;
use sha1::{Digest, Sha1};

const MAGIC: u32 = 0xFEED_FEED;
const VERSION: u32 = 2;
const TRUSTED_CERTIFICATE_TAG: u32 = 2;
const CERTIFICATE_TYPE: &str = "X.509";
const INTEGRITY_SALT: &[u8] = b"Mighty Aphrodite";

/// Encode a canonical PEM bundle as a JKS truststore
///
/// The entry timestamp is the certificate's NotBefore so the output only
/// depends on the bundle and the password.
///
/// # Errors
///
/// Returns `Encoding` if a certificate cannot be parsed or an alias is too
/// long for the format.
pub fn encode_jks(bundle: &str, password: &str) -> Result<Vec<u8>, BundleError> {
    let entries = certificate_entries(bundle)?;
    let count = u32::try_from(entries.len())
        .map_err(|e| BundleError::Encoding(format!("too many certificates for JKS: {e}")))?;

    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());

    for entry in &entries {
        out.extend_from_slice(&TRUSTED_CERTIFICATE_TAG.to_be_bytes());
        write_utf(&mut out, &entry.alias)?;
        out.extend_from_slice(&entry.not_before_millis.to_be_bytes());
        write_utf(&mut out, CERTIFICATE_TYPE)?;
        let length = u32::try_from(entry.der.len()).map_err(|e| {
            BundleError::Encoding(format!("certificate {} is too large: {e}", entry.alias))
        })?;
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&entry.der);
    }

    let digest = integrity_digest(password, &out);
    out.extend_from_slice(&digest);

    Ok(out)
}

fn write_utf(out: &mut Vec<u8>, value: &str) -> Result<(), BundleError> {
    let length = u16::try_from(value.len()).map_err(|e| {
        BundleError::Encoding(format!("JKS string of {} bytes is too long: {e}", value.len()))
    })?;
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn integrity_digest(password: &str, body: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for unit in password.encode_utf16() {
        hasher.update(unit.to_be_bytes());
    }
    hasher.update(INTEGRITY_SALT);
    hasher.update(body);
    hasher.finalize().into()
}
