//! In-memory loopback transport.
//!
//! Acts as both client and broker: publishes are recorded per channel and
//! delivered to any local subscriber of the same channel. Publish failures
//! can be injected to exercise the relay's failure paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::transport::{Inbox, Subscriptions, Transport, TransportError};

#[derive(Clone)]
pub struct MemoryTransport {
    subscriptions: Subscriptions,
    published: Arc<DashMap<String, Vec<Bytes>>>,
    publish_count: Arc<AtomicUsize>,
    fail_publishes: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            subscriptions: Subscriptions::new(),
            published: Arc::new(DashMap::new()),
            publish_count: Arc::new(AtomicUsize::new(0)),
            fail_publishes: Arc::new(AtomicUsize::new(0)),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Make the next `n` publishes fail with `TransportError::Publish`.
    pub fn fail_next_publishes(&self, n: usize) {
        self.fail_publishes.store(n, Ordering::SeqCst);
    }

    /// Payloads accepted on `channel`, in publish order.
    pub fn published(&self, channel: &str) -> Vec<Bytes> {
        self.published
            .get(channel)
            .map(|p| p.value().clone())
            .unwrap_or_default()
    }

    /// Total accepted publishes across all channels.
    pub fn publish_count(&self) -> usize {
        self.publish_count.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Deliver a payload as if another broker client had published it.
    pub fn inject(&self, channel: &str, payload: impl Into<Bytes>) -> bool {
        self.subscriptions.route(channel, payload.into())
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Transport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        if self.take_injected_failure() {
            return Err(TransportError::Publish {
                channel: channel.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        self.published
            .entry(channel.to_string())
            .or_default()
            .push(payload.clone());
        self.publish_count.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.route(channel, payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Inbox, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        Ok(self.subscriptions.open(channel))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.subscriptions.close(channel);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.close_all();
        Ok(())
    }
}
