//! Broker client: MQTT 3.1.1 over plain TCP.

pub mod client;
pub mod codec;

pub use client::MqttTransport;

#[cfg(test)]
pub(crate) mod test_broker;
