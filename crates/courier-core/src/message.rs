//! Outgoing message identity and delivery state.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Sequence identifier assigned by the relay session, strictly increasing
/// from 1 within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-message delivery state.
///
/// ```text
/// Pending → Encrypting → Publishing → Acknowledged
///    │           │            │
///    └───────────┴────────────┴─────→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Pending,
    Encrypting,
    Publishing,
    Acknowledged,
    Failed,
}

impl MessageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Acknowledged | MessageState::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: MessageState) -> bool {
        use MessageState::*;
        matches!(
            (self, next),
            (Pending, Encrypting)
                | (Encrypting, Publishing)
                | (Publishing, Acknowledged)
                | (Pending | Encrypting | Publishing, Failed)
        )
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageState::Pending => "pending",
            MessageState::Encrypting => "encrypting",
            MessageState::Publishing => "publishing",
            MessageState::Acknowledged => "acknowledged",
            MessageState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Plaintext of one outgoing message. Wiped when dropped.
pub struct Message {
    pub id: MessageId,
    plaintext: Zeroizing<Vec<u8>>,
}

impl Message {
    pub fn new(id: MessageId, plaintext: Vec<u8>) -> Self {
        Self {
            id,
            plaintext: Zeroizing::new(plaintext),
        }
    }

    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }

    pub fn len(&self) -> usize {
        self.plaintext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plaintext.is_empty()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("len", &self.plaintext.len())
            .finish()
    }
}
