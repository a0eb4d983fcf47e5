//! Transport trait — the publish/subscribe seam between the relay and a
//! message broker.
//!
//! Implementations own their connection lifecycle. Inbound messages are
//! delivered through per-channel [`Inbox`]es; see [`crate::inbound`] for the
//! handler contract built on top of them.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub payload: Bytes,
}

/// Receiving end of one channel subscription. Closes on unsubscribe or
/// disconnect.
pub type Inbox = mpsc::UnboundedReceiver<InboundMessage>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },
    #[error("subscribe to {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },
    #[error("transport is closed")]
    Closed,
}

/// Publish/subscribe over named channels.
///
/// `publish` resolves once the broker connection has accepted the bytes; it
/// does not wait for end-to-end delivery.
pub trait Transport: Send + Sync + 'static {
    fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn subscribe(&self, channel: &str) -> impl Future<Output = Result<Inbox, TransportError>> + Send;

    fn unsubscribe(&self, channel: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the connection. Open inboxes are closed.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

// ── Subscription routing ──────────────────────────────────────────────────────

/// Exact-match channel → inbox routing shared by transport implementations.
///
/// One inbox per channel; subscribing again replaces (and closes) the
/// previous inbox.
#[derive(Clone, Default)]
pub struct Subscriptions {
    routes: Arc<DashMap<String, mpsc::UnboundedSender<InboundMessage>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an inbox for `channel`.
    pub fn open(&self, channel: &str) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(channel.to_string(), tx);
        rx
    }

    /// Close the inbox for `channel`. Returns whether one existed.
    pub fn close(&self, channel: &str) -> bool {
        self.routes.remove(channel).is_some()
    }

    pub fn close_all(&self) {
        self.routes.clear();
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.routes.contains_key(channel)
    }

    /// Deliver to the channel's inbox. Returns false when nobody is
    /// listening; a dropped inbox is pruned.
    pub fn route(&self, channel: &str, payload: Bytes) -> bool {
        let delivered = match self.routes.get(channel) {
            Some(tx) => tx
                .send(InboundMessage {
                    channel: channel.to_string(),
                    payload,
                })
                .is_ok(),
            None => return false,
        };
        if !delivered {
            self.routes.remove(channel);
            tracing::debug!(channel, "inbox dropped, subscription pruned");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn route_reaches_open_inbox() {
        let subs = Subscriptions::new();
        let mut inbox = subs.open("/topic/topic2");

        assert!(subs.route("/topic/topic2", Bytes::from_static(b"hello")));
        let msg = inbox.recv().await.unwrap();
        assert_eq!(msg.channel, "/topic/topic2");
        assert_eq!(&msg.payload[..], b"hello");
    }

    #[test]
    fn route_without_subscriber_is_dropped() {
        let subs = Subscriptions::new();
        assert!(!subs.route("/topic/none", Bytes::new()));
    }

    #[tokio::test]
    async fn close_ends_inbox() {
        let subs = Subscriptions::new();
        let mut inbox = subs.open("a");
        assert!(subs.close("a"));
        assert!(inbox.recv().await.is_none());
        assert!(!subs.close("a"));
    }

    #[test]
    fn dropped_inbox_is_pruned() {
        let subs = Subscriptions::new();
        drop(subs.open("a"));
        assert!(!subs.route("a", Bytes::new()));
        assert!(!subs.is_subscribed("a"));
    }

    #[tokio::test]
    async fn resubscribe_replaces_previous_inbox() {
        let subs = Subscriptions::new();
        let mut first = subs.open("a");
        let mut second = subs.open("a");

        assert!(first.recv().await.is_none());
        assert!(subs.route("a", Bytes::from_static(b"x")));
        assert_eq!(&second.recv().await.unwrap().payload[..], b"x");
    }
}
