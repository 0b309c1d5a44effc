//! PKCS#12 truststore encoding.

use super::certificate_entries;
use crate::controller::error::BundleError;
use p12_keystore::{Certificate, KeyStore, KeyStoreEntry};

/// Encode a canonical PEM bundle as a PKCS#12 truststore
///
/// Each certificate becomes a trusted certificate bag named by its alias.
/// Salts are random, so the bytes differ between calls while the content
/// does not.
///
/// # Errors
///
/// Returns `Encoding` if a certificate is rejected or the store cannot be written.
pub fn encode_pkcs12(bundle: &str, password: &str) -> Result<Vec<u8>, BundleError> {
    let mut keystore = KeyStore::new();

    for entry in certificate_entries(bundle)? {
        let certificate = Certificate::from_der(&entry.der).map_err(|e| {
            BundleError::Encoding(format!("certificate {} rejected: {e}", entry.alias))
        })?;
        keystore.add_entry(&entry.alias, KeyStoreEntry::Certificate(certificate));
    }

    keystore
        .writer(password)
        .write()
        .map_err(|e| BundleError::Encoding(format!("failed to write PKCS#12 store: {e}")))
}
