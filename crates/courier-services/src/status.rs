//! Delivery status table — one record per submitted message.
//!
//! Records survive their message's plaintext: once a message is
//! `Acknowledged` or `Failed` only this metadata remains, and it is pruned
//! after the retention window. Non-terminal records are never pruned.

use std::sync::Arc;
use std::time::Duration;

use courier_core::{MessageId, MessageState};
use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub state: MessageState,
    pub plaintext_len: usize,
    /// Ciphertext segments in the envelope. Zero until encrypted.
    pub chunks: usize,
    /// Envelope size on the wire. Zero until encrypted.
    pub envelope_len: usize,
    pub failure: Option<String>,
    pub created_at: Instant,
    pub resolved_at: Option<Instant>,
}

impl MessageRecord {
    pub fn pending(id: MessageId, plaintext_len: usize) -> Self {
        Self {
            id,
            state: MessageState::Pending,
            plaintext_len,
            chunks: 0,
            envelope_len: 0,
            failure: None,
            created_at: Instant::now(),
            resolved_at: None,
        }
    }
}

#[derive(Clone)]
pub struct StatusTable {
    records: Arc<DashMap<MessageId, MessageRecord>>,
    retention: Duration,
}

impl StatusTable {
    pub fn new(retention: Duration) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            retention,
        }
    }

    pub fn insert(&self, record: MessageRecord) {
        self.records.insert(record.id, record);
    }

    /// Move a record to `next`. Returns false (and leaves the record alone)
    /// for unknown ids and transitions the state machine does not allow.
    pub fn advance(&self, id: MessageId, next: MessageState) -> bool {
        let Some(mut record) = self.records.get_mut(&id) else {
            return false;
        };
        if !record.state.can_transition_to(next) {
            tracing::warn!(
                message_id = %id,
                from = %record.state,
                to = %next,
                "illegal state transition ignored"
            );
            return false;
        }
        record.state = next;
        if next.is_terminal() {
            record.resolved_at = Some(Instant::now());
        }
        true
    }

    /// Move a live record to `Failed` with a reason.
    pub fn fail(&self, id: MessageId, reason: impl Into<String>) -> bool {
        let Some(mut record) = self.records.get_mut(&id) else {
            return false;
        };
        if record.state.is_terminal() {
            return false;
        }
        record.state = MessageState::Failed;
        record.failure = Some(reason.into());
        record.resolved_at = Some(Instant::now());
        true
    }

    /// Apply `f` to a record in place.
    pub fn update(&self, id: MessageId, f: impl FnOnce(&mut MessageRecord)) {
        if let Some(mut record) = self.records.get_mut(&id) {
            f(&mut record);
        }
    }

    /// Record lookup. Records past retention are treated as gone.
    pub fn get(&self, id: MessageId) -> Option<MessageRecord> {
        let record = self.records.get(&id)?;
        if self.expired(&record, Instant::now()) {
            return None;
        }
        Some(record.value().clone())
    }

    /// Record lookup that ignores retention, for callers that must report
    /// on a message they just resolved.
    pub fn peek(&self, id: MessageId) -> Option<MessageRecord> {
        self.records.get(&id).map(|record| record.value().clone())
    }

    /// Ids of messages that have not reached a terminal state.
    pub fn in_flight(&self) -> Vec<MessageId> {
        let mut ids: Vec<MessageId> = self
            .records
            .iter()
            .filter(|r| !r.state.is_terminal())
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids
    }

    /// Drop resolved records older than the retention window.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| !self.expired(record, now));
        let pruned = before - self.records.len();
        if pruned > 0 {
            tracing::debug!(pruned, remaining = self.records.len(), "status records pruned");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn expired(&self, record: &MessageRecord, now: Instant) -> bool {
        record
            .resolved_at
            .is_some_and(|at| now.duration_since(at) >= self.retention)
    }
}
