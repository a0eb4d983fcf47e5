//! Courier wire format — the envelope handed to the transport.
//!
//! ```text
//! ┌──────────────────────┬─────────────┬──────────────────────┬─────────────┐
//! │ ciphertext 0         │ END_MESSAGE │ ciphertext 1         │ END_MESSAGE │ …
//! │ (modulus_len bytes)  │ (11 bytes)  │ (modulus_len bytes)  │ (11 bytes)  │
//! └──────────────────────┴─────────────┴──────────────────────┴─────────────┘
//! ```
//!
//! Every ciphertext block is exactly the recipient modulus length, so the
//! terminator positions are fixed by the key alone. No escaping is needed.

use bytes::Bytes;

use crate::framer::{self, FramerError, TERMINATOR};

/// Wire representation of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    bytes: Bytes,
    segment_len: usize,
}

impl Envelope {
    /// Frame already-encrypted blocks of `segment_len` bytes each.
    pub(crate) fn seal(ciphertexts: &[Vec<u8>], segment_len: usize) -> Self {
        Self {
            bytes: Bytes::from(framer::seal_segments(ciphertexts)),
            segment_len,
        }
    }

    /// Validate bytes received from the wire against a known block length.
    pub fn from_wire(bytes: Bytes, segment_len: usize) -> Result<Self, FramerError> {
        framer::open_segments(&bytes, segment_len)?;
        Ok(Self { bytes, segment_len })
    }

    /// Ciphertext blocks in order, terminators stripped.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.bytes
            .chunks(self.stride())
            .map(move |tuple| &tuple[..self.segment_len])
    }

    /// Number of terminator-delimited segments.
    pub fn chunk_count(&self) -> usize {
        self.bytes.len() / self.stride()
    }

    pub fn segment_len(&self) -> usize {
        self.segment_len
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cheap handle for the transport; shares the underlying buffer.
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    fn stride(&self) -> usize {
        self.segment_len + TERMINATOR.len()
    }
}
