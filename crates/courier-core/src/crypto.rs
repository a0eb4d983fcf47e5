//! Chunked RSA encryption for Courier.
//!
//! Raw RSA can only seal `modulus_len - padding_overhead` bytes per
//! operation. Messages are therefore split by the framer to the recipient
//! key's capacity and every chunk is encrypted on its own. Each ciphertext is
//! exactly `modulus_len` bytes, which is what makes the terminator framing in
//! [`crate::wire`] unambiguous.
//!
//! Both supported paddings are randomized: encrypting the same plaintext
//! twice yields different ciphertext with identical chunk boundaries.
//!
//! Plaintext chunk buffers are zeroized when dropped (see [`framer::Chunk`]).

use std::fmt;
use std::str::FromStr;

use rand::{CryptoRng, RngCore};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::framer::{self, Chunk, FramerError};
use crate::wire::Envelope;

// ── Padding ───────────────────────────────────────────────────────────────────

/// RSA padding scheme bound to a recipient key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    /// PKCS#1 v1.5, 11 bytes of overhead. What deployed hardware nodes decrypt.
    #[default]
    #[serde(rename = "pkcs1v15")]
    Pkcs1v15,
    /// OAEP with SHA-256 for both hash and MGF1: `2 * 32 + 2` bytes of overhead.
    #[serde(rename = "oaep-sha256")]
    OaepSha256,
}

impl Padding {
    /// Bytes of each RSA block consumed by the padding.
    pub const fn overhead(self) -> usize {
        match self {
            Padding::Pkcs1v15 => 11,
            Padding::OaepSha256 => 2 * 32 + 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Padding::Pkcs1v15 => "pkcs1v15",
            Padding::OaepSha256 => "oaep-sha256",
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Padding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pkcs1v15" | "pkcs1" => Ok(Padding::Pkcs1v15),
            "oaep-sha256" | "oaep" => Ok(Padding::OaepSha256),
            other => Err(format!("unknown padding scheme: {other}")),
        }
    }
}

// ── Recipient key ─────────────────────────────────────────────────────────────

/// The single public key every outgoing message is sealed to.
///
/// Read-only once constructed. The fingerprint is a BLAKE3 digest of the
/// modulus and exponent, used in logs instead of key material.
#[derive(Debug, Clone)]
pub struct RecipientKey {
    key: RsaPublicKey,
    padding: Padding,
    fingerprint: [u8; 32],
}

impl RecipientKey {
    pub fn new(key: RsaPublicKey, padding: Padding) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&key.n().to_bytes_be());
        hasher.update(&key.e().to_bytes_be());
        let fingerprint = *hasher.finalize().as_bytes();
        Self {
            key,
            padding,
            fingerprint,
        }
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.key
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    /// Length of one ciphertext block, i.e. the modulus size in bytes.
    pub fn modulus_len(&self) -> usize {
        self.key.size()
    }

    /// Largest plaintext a single RSA operation under this key can take.
    /// Zero means the modulus is too small for the padding.
    pub fn max_plaintext_capacity(&self) -> usize {
        self.modulus_len().saturating_sub(self.padding.overhead())
    }

    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    /// Short hex form for logs.
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(&self.fingerprint[..8])
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Framing(#[from] FramerError),
    #[error("key has no plaintext capacity: {modulus_len}-byte modulus under {padding}")]
    PlaintextTooLarge { modulus_len: usize, padding: Padding },
    #[error("encryption failed: {0}")]
    EncryptionFailed(#[source] rsa::Error),
    #[error("decryption failed on segment {index}: {source}")]
    DecryptionFailed {
        index: usize,
        #[source]
        source: rsa::Error,
    },
}

impl CryptoError {
    /// Configuration faults that no later message can recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CryptoError::PlaintextTooLarge { .. }
                | CryptoError::Framing(FramerError::InvalidChunkSize)
        )
    }
}

// ── Encrypt / decrypt ─────────────────────────────────────────────────────────

/// Encrypt `plaintext` to `key`, one RSA operation per capacity-sized chunk.
pub fn encrypt(plaintext: &[u8], key: &RecipientKey) -> Result<Envelope, CryptoError> {
    encrypt_with_rng(plaintext, key, &mut rand::thread_rng())
}

/// [`encrypt`] with a caller-supplied RNG.
pub fn encrypt_with_rng<R>(
    plaintext: &[u8],
    key: &RecipientKey,
    rng: &mut R,
) -> Result<Envelope, CryptoError>
where
    R: CryptoRng + RngCore,
{
    let capacity = key.max_plaintext_capacity();
    if capacity == 0 {
        return Err(CryptoError::PlaintextTooLarge {
            modulus_len: key.modulus_len(),
            padding: key.padding(),
        });
    }

    let chunks = framer::split(plaintext, capacity)?;
    let ciphertexts = chunks
        .iter()
        .map(|chunk| encrypt_block(key, &mut *rng, &chunk.payload))
        .collect::<Result<Vec<_>, _>>()
        .map_err(CryptoError::EncryptionFailed)?;

    tracing::trace!(
        key = %key.fingerprint_hex(),
        plaintext_len = plaintext.len(),
        chunks = ciphertexts.len(),
        "plaintext sealed"
    );

    Ok(Envelope::seal(&ciphertexts, key.modulus_len()))
}

fn encrypt_block<R>(key: &RecipientKey, rng: &mut R, block: &[u8]) -> rsa::Result<Vec<u8>>
where
    R: CryptoRng + RngCore,
{
    match key.padding() {
        Padding::Pkcs1v15 => key.public_key().encrypt(rng, Pkcs1v15Encrypt, block),
        Padding::OaepSha256 => key.public_key().encrypt(rng, Oaep::new::<Sha256>(), block),
    }
}

/// Recipient side: open an envelope with the matching private key.
pub fn decrypt(
    envelope: &[u8],
    key: &RsaPrivateKey,
    padding: Padding,
) -> Result<Vec<u8>, CryptoError> {
    let segments = framer::open_segments(envelope, key.size())?;
    let last = segments.len().saturating_sub(1);

    let mut chunks = Vec::with_capacity(segments.len());
    for (index, segment) in segments.into_iter().enumerate() {
        let payload = match padding {
            Padding::Pkcs1v15 => key.decrypt(Pkcs1v15Encrypt, segment),
            Padding::OaepSha256 => key.decrypt(Oaep::new::<Sha256>(), segment),
        }
        .map_err(|source| CryptoError::DecryptionFailed { index, source })?;

        chunks.push(Chunk {
            index: index as u32,
            is_final: index == last,
            payload,
        });
    }

    Ok(framer::join(&chunks))
}
