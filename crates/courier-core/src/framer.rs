//! Framer — chunk boundaries for plaintext and terminator framing for
//! ciphertext.
//!
//! Plaintext is cut into chunks of exactly the key's capacity, with the
//! remainder in a final chunk. Ciphertext chunks are all the key's modulus
//! length, so the envelope is a flat run of `(ciphertext || TERMINATOR)`
//! tuples and can be opened by stride alone.

use static_assertions::const_assert_eq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Marker written after every ciphertext chunk on the wire.
pub const TERMINATOR: &[u8] = b"END_MESSAGE";

// Receivers match this literal byte-for-byte; its length is part of the format.
const_assert_eq!(TERMINATOR.len(), 11);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramerError {
    #[error("chunk size must be positive")]
    InvalidChunkSize,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// One bounded unit of a message. Plaintext payloads are wiped on drop.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Chunk {
    /// Position within the message, starting at 0.
    pub index: u32,
    /// True only for the last chunk of a message.
    pub is_final: bool,
    pub payload: Vec<u8>,
}

/// Split `plaintext` into chunks of exactly `max_chunk_size` bytes, the last
/// holding the remainder.
///
/// Empty input yields a single empty final chunk, so every message produces
/// at least one envelope segment.
pub fn split(plaintext: &[u8], max_chunk_size: usize) -> Result<Vec<Chunk>, FramerError> {
    if max_chunk_size == 0 {
        return Err(FramerError::InvalidChunkSize);
    }

    if plaintext.is_empty() {
        return Ok(vec![Chunk {
            index: 0,
            is_final: true,
            payload: Vec::new(),
        }]);
    }

    let count = plaintext.len().div_ceil(max_chunk_size);
    let chunks = plaintext
        .chunks(max_chunk_size)
        .enumerate()
        .map(|(i, payload)| Chunk {
            index: i as u32,
            is_final: i + 1 == count,
            payload: payload.to_vec(),
        })
        .collect();

    Ok(chunks)
}

/// Number of chunks `split` produces for a plaintext of `len` bytes.
pub fn chunk_count(len: usize, max_chunk_size: usize) -> Result<usize, FramerError> {
    if max_chunk_size == 0 {
        return Err(FramerError::InvalidChunkSize);
    }
    Ok(len.div_ceil(max_chunk_size).max(1))
}

/// Concatenate chunk payloads in index order.
pub fn join(chunks: &[Chunk]) -> Vec<u8> {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);

    let total = ordered.iter().map(|c| c.payload.len()).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in ordered {
        out.extend_from_slice(&chunk.payload);
    }
    out
}

/// Append the terminator to each ciphertext segment and concatenate.
pub fn seal_segments<I, S>(segments: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for segment in segments {
        out.extend_from_slice(segment.as_ref());
        out.extend_from_slice(TERMINATOR);
    }
    out
}

/// Inverse of [`seal_segments`] for fixed-length segments.
///
/// Walks the input in strides of `segment_len + TERMINATOR.len()` and
/// checks the terminator at the end of every stride.
pub fn open_segments(data: &[u8], segment_len: usize) -> Result<Vec<&[u8]>, FramerError> {
    if segment_len == 0 {
        return Err(FramerError::InvalidChunkSize);
    }

    let stride = segment_len + TERMINATOR.len();
    if data.is_empty() || data.len() % stride != 0 {
        return Err(FramerError::MalformedEnvelope(format!(
            "length {} is not a multiple of {stride}",
            data.len()
        )));
    }

    data.chunks(stride)
        .enumerate()
        .map(|(i, tuple)| {
            let (segment, marker) = tuple.split_at(segment_len);
            if marker != TERMINATOR {
                return Err(FramerError::MalformedEnvelope(format!(
                    "segment {i} is not followed by the terminator"
                )));
            }
            Ok(segment)
        })
        .collect()
}
