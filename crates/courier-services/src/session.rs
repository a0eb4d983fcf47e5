//! RelaySession — operator input → encrypt → publish, with per-message
//! delivery tracking.
//!
//! One session per recipient key. `submit` takes `&mut self`, so each message
//! resolves before the next one starts encrypting. Publishing is at most once:
//! a failed publish is recorded and never retried.

use std::sync::Arc;
use std::time::Duration;

use courier_core::crypto;
use courier_core::{CryptoError, Message, MessageId, MessageState, RecipientKey};
use thiserror::Error;

use crate::status::{MessageRecord, StatusTable};
use crate::transport::{Transport, TransportError};

/// Reason recorded for messages cut short by shutdown.
pub const INTERRUPTED: &str = "interrupted";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown message id {0}")]
    UnknownMessageId(MessageId),
    /// Configuration-level crypto failure. The message is already `Failed`.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct RelaySession<T: Transport> {
    transport: Arc<T>,
    key: Arc<RecipientKey>,
    channel: String,
    next_id: u64,
    table: StatusTable,
}

impl<T: Transport> RelaySession<T> {
    pub fn new(
        transport: Arc<T>,
        key: Arc<RecipientKey>,
        channel: impl Into<String>,
        retention: Duration,
    ) -> Self {
        Self {
            transport,
            key,
            channel: channel.into(),
            next_id: 1,
            table: StatusTable::new(retention),
        }
    }

    /// Encrypt and publish one message.
    ///
    /// Per-message failures (RSA errors, publish errors) leave the message
    /// `Failed` and still return its id. `Err` is reserved for failures that
    /// would hit every message under this key; the message is marked `Failed`
    /// before returning.
    pub async fn submit(&mut self, plaintext: Vec<u8>) -> Result<MessageId, SessionError> {
        self.table.prune();

        let id = MessageId(self.next_id);
        self.next_id += 1;
        let message = Message::new(id, plaintext);
        self.table.insert(MessageRecord::pending(id, message.len()));
        tracing::debug!(message_id = %id, len = message.len(), "message accepted");

        // ── Encrypt ──────────────────────────────────────────────────────────
        self.table.advance(id, MessageState::Encrypting);
        let key = self.key.clone();
        // The plaintext moves into the worker and is wiped when it drops there.
        let encrypted =
            tokio::task::spawn_blocking(move || crypto::encrypt(message.plaintext(), &key)).await;

        let envelope = match encrypted {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(e)) => {
                tracing::warn!(message_id = %id, error = %e, "encryption failed");
                self.table.fail(id, e.to_string());
                if e.is_fatal() {
                    return Err(e.into());
                }
                return Ok(id);
            }
            Err(e) => {
                tracing::error!(message_id = %id, error = %e, "encryption worker died");
                self.table.fail(id, format!("encryption worker died: {e}"));
                return Ok(id);
            }
        };

        let chunks = envelope.chunk_count();
        let envelope_len = envelope.len();
        self.table.update(id, |r| {
            r.chunks = chunks;
            r.envelope_len = envelope_len;
        });

        // ── Publish ──────────────────────────────────────────────────────────
        self.table.advance(id, MessageState::Publishing);
        match self.transport.publish(&self.channel, envelope.to_bytes()).await {
            Ok(()) => {
                self.table.advance(id, MessageState::Acknowledged);
                tracing::info!(
                    message_id = %id,
                    chunks,
                    envelope_len,
                    channel = %self.channel,
                    "message published"
                );
            }
            Err(e) => {
                tracing::warn!(message_id = %id, channel = %self.channel, error = %e, "publish failed");
                self.table.fail(id, e.to_string());
            }
        }
        Ok(id)
    }

    /// `submit`, returning the resolved record rather than the id. The record
    /// is read back even when the retention window has already lapsed.
    pub async fn submit_record(&mut self, plaintext: Vec<u8>) -> Result<MessageRecord, SessionError> {
        let id = self.submit(plaintext).await?;
        self.table.peek(id).ok_or(SessionError::UnknownMessageId(id))
    }

    pub fn status(&self, id: MessageId) -> Result<MessageState, SessionError> {
        self.record(id).map(|r| r.state)
    }

    pub fn record(&self, id: MessageId) -> Result<MessageRecord, SessionError> {
        self.table.get(id).ok_or(SessionError::UnknownMessageId(id))
    }

    /// Fail every message that has not reached a terminal state. Returns the
    /// ids touched.
    pub fn abandon_in_flight(&self) -> Vec<MessageId> {
        let abandoned: Vec<MessageId> = self
            .table
            .in_flight()
            .into_iter()
            .filter(|id| self.table.fail(*id, INTERRUPTED))
            .collect();
        if !abandoned.is_empty() {
            tracing::warn!(count = abandoned.len(), "in-flight messages abandoned");
        }
        abandoned
    }

    /// Abandon in-flight messages and disconnect the transport.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.abandon_in_flight();
        self.transport.disconnect().await?;
        tracing::info!(channel = %self.channel, "relay session closed");
        Ok(())
    }

    pub fn key(&self) -> &RecipientKey {
        &self.key
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn status_table(&self) -> &StatusTable {
        &self.table
    }
}
