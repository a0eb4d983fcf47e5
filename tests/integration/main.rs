//! Courier integration test harness.
//!
//! Scenarios run the full relay path (key store → session → transport)
//! against the in-memory loopback transport, and open published envelopes
//! with the recipient's private key from `fixtures/`.
//!
//!   cargo test --test integration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use courier_core::{KeyStore, Padding, RecipientKey};
use courier_services::{MemoryTransport, RelaySession};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const INBOUND: &str = "/topic/topic2";
pub const OUTBOUND: &str = "/topic/topic3";

/// RSA-2048 modulus length in bytes.
pub const MODULUS_LEN: usize = 256;

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

pub fn key_store(padding: Padding) -> KeyStore {
    KeyStore::new(fixtures_dir(), padding)
}

pub fn recipient_key(padding: Padding) -> Arc<RecipientKey> {
    Arc::new(
        key_store(padding)
            .load_public_key("recipient_public")
            .expect("fixture public key loads"),
    )
}

pub fn recipient_private_key() -> RsaPrivateKey {
    let pem = std::fs::read_to_string(fixtures_dir().join("recipient_private.pem"))
        .expect("fixture private key readable");
    RsaPrivateKey::from_pkcs8_pem(&pem).expect("fixture private key parses")
}

pub struct Relay {
    pub transport: Arc<MemoryTransport>,
    pub session: RelaySession<MemoryTransport>,
}

pub fn relay(padding: Padding) -> Relay {
    relay_with_retention(padding, Duration::from_secs(300))
}

pub fn relay_with_retention(padding: Padding, retention: Duration) -> Relay {
    let transport = Arc::new(MemoryTransport::new());
    let session = RelaySession::new(
        transport.clone(),
        recipient_key(padding),
        OUTBOUND,
        retention,
    );
    Relay { transport, session }
}

// ── Test modules ──────────────────────────────────────────────────────────────

mod envelope;
mod inbound;
mod keys;
mod scenarios;
