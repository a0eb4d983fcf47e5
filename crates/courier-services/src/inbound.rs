//! Inbound dispatch: run a handler over one subscription's messages.

use tokio::task::JoinHandle;

use crate::transport::{InboundMessage, Inbox};

/// Drive `handler` over `inbox` on a dedicated task.
///
/// Messages are handled one at a time in receipt order. The task ends when
/// the inbox closes (unsubscribe or disconnect); a handler call already in
/// progress runs to completion first.
pub fn on_message<F>(mut inbox: Inbox, mut handler: F) -> JoinHandle<()>
where
    F: FnMut(InboundMessage) + Send + 'static,
{
    tokio::spawn(async move {
        let mut handled = 0u64;
        while let Some(message) = inbox.recv().await {
            tracing::trace!(channel = %message.channel, len = message.payload.len(), "inbound message");
            handler(message);
            handled += 1;
        }
        tracing::debug!(handled, "inbox closed, handler stopped");
    })
}
