//! courier-core — framing, chunked RSA encryption, key loading, and config.
//! All other Courier crates depend on this one.

pub mod config;
pub mod crypto;
pub mod framer;
pub mod keystore;
pub mod message;
pub mod wire;

pub use crypto::{CryptoError, Padding, RecipientKey};
pub use framer::{Chunk, FramerError, TERMINATOR};
pub use keystore::{KeyLoadError, KeyStore};
pub use message::{Message, MessageId, MessageState};
pub use wire::Envelope;
