//! courier-services — relay session, delivery tracking, and the transport
//! seam the daemon plugs a broker client into.

pub mod inbound;
pub mod memory;
pub mod session;
pub mod status;
pub mod transport;

pub use inbound::on_message;
pub use memory::MemoryTransport;
pub use session::{RelaySession, SessionError, INTERRUPTED};
pub use status::{MessageRecord, StatusTable};
pub use transport::{InboundMessage, Inbox, Subscriptions, Transport, TransportError};
