//! Key store — resolves the recipient public key, provisioned out of band.
//!
//! Identifiers are file names relative to the key directory. A bare name
//! gets `.pem` appended. Both SPKI (`BEGIN PUBLIC KEY`) and PKCS#1
//! (`BEGIN RSA PUBLIC KEY`) PEM encodings are accepted.

use std::path::{Path, PathBuf};

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use thiserror::Error;

use crate::crypto::{Padding, RecipientKey};

#[derive(Debug, Error)]
pub enum KeyLoadError {
    #[error("failed to read key {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("{0} does not hold an RSA public key in PEM form")]
    InvalidKeyMaterial(String),
}

pub struct KeyStore {
    dir: PathBuf,
    padding: Padding,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>, padding: Padding) -> Self {
        Self {
            dir: dir.into(),
            padding,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path an identifier resolves to. An absolute identifier replaces the key
    /// directory; either way `.pem` is added when the name has no extension.
    pub fn resolve(&self, identifier: &str) -> PathBuf {
        let mut path = self.dir.join(identifier);
        if path.extension().is_none() {
            path.set_extension("pem");
        }
        path
    }

    /// Load the recipient key named by `identifier`.
    pub fn load_public_key(&self, identifier: &str) -> Result<RecipientKey, KeyLoadError> {
        let path = self.resolve(identifier);
        let pem = std::fs::read_to_string(&path)
            .map_err(|e| KeyLoadError::ReadFailed(path.clone(), e))?;
        let key = decode_public_key(&pem, self.padding)
            .map_err(|_| KeyLoadError::InvalidKeyMaterial(path.display().to_string()))?;

        tracing::info!(
            path = %path.display(),
            fingerprint = %key.fingerprint_hex(),
            modulus_bits = key.modulus_len() * 8,
            padding = %key.padding(),
            capacity = key.max_plaintext_capacity(),
            "recipient key loaded"
        );
        if key.max_plaintext_capacity() == 0 {
            tracing::warn!(
                fingerprint = %key.fingerprint_hex(),
                "recipient modulus too small for padding; every message will fail"
            );
        }

        Ok(key)
    }
}

/// Decode a PEM public key in either SPKI or PKCS#1 form.
pub fn decode_public_key(pem: &str, padding: Padding) -> Result<RecipientKey, KeyLoadError> {
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| KeyLoadError::InvalidKeyMaterial(e.to_string()))?;
    Ok(RecipientKey::new(key, padding))
}
