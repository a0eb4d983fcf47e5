//! Node startup: recipient key, then broker, then the relay session.
//!
//! The key is loaded before any network activity so a bad identifier never
//! opens a broker connection.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use courier_core::config::CourierConfig;
use courier_core::KeyStore;
use courier_services::{on_message, RelaySession, Transport};
use tokio::task::JoinHandle;

use crate::console;
use crate::mqtt::MqttTransport;

/// A started node: the session the console drives and the task echoing
/// inbound messages.
pub struct Node {
    pub session: RelaySession<MqttTransport>,
    pub inbound: JoinHandle<()>,
}

/// `start`, abandoned when `shutdown` resolves first. `Ok(None)` means the
/// node was stopped before it came up.
pub async fn start_until<F: Future>(config: &CourierConfig, shutdown: F) -> Result<Option<Node>> {
    tokio::select! {
        _ = shutdown => {
            tracing::info!("interrupted during startup");
            Ok(None)
        }
        node = start(config) => node.map(Some),
    }
}

pub async fn start(config: &CourierConfig) -> Result<Node> {
    let store = KeyStore::new(config.key.dir.clone(), config.key.padding);
    let key = store
        .load_public_key(&config.key.identifier)
        .with_context(|| format!("loading recipient key {:?}", config.key.identifier))?;
    tracing::info!(
        fingerprint = %key.fingerprint_hex(),
        padding = %key.padding(),
        capacity = key.max_plaintext_capacity(),
        "recipient key ready"
    );

    let transport = Arc::new(
        MqttTransport::connect(&config.broker)
            .await
            .context("connecting to broker")?,
    );
    let inbox = match transport.subscribe(&config.channels.inbound).await {
        Ok(inbox) => inbox,
        Err(e) => {
            let _ = transport.disconnect().await;
            return Err(e).context("subscribing to inbound channel");
        }
    };
    let inbound = on_message(inbox, |message| println!("{}", console::inbound_line(&message)));

    let session = RelaySession::new(
        transport,
        Arc::new(key),
        config.channels.outbound.clone(),
        config.session.retention(),
    );
    tracing::info!(
        inbound = %config.channels.inbound,
        outbound = %config.channels.outbound,
        "courierd ready"
    );
    Ok(Node { session, inbound })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::mqtt::codec::Packet;
    use crate::mqtt::test_broker::spawn_broker;
    use tokio::net::TcpListener;

    fn fixtures() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../tests/integration/fixtures")
    }

    #[tokio::test]
    async fn bad_key_never_contacts_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = CourierConfig::default();
        config.broker.address = "127.0.0.1".into();
        config.broker.port = listener.local_addr().unwrap().port();
        config.key.dir = fixtures();
        config.key.identifier = "no_such_key".into();

        let err = start(&config).await.err().unwrap();
        assert!(format!("{err:#}").contains("no_such_key"));

        let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err(), "broker was contacted before the key loaded");
    }

    #[tokio::test]
    async fn shutdown_during_connect_stops_cleanly() {
        // Accepts the TCP connection and never answers CONNECT.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = CourierConfig::default();
        config.broker.address = "127.0.0.1".into();
        config.broker.port = listener.local_addr().unwrap().port();
        config.broker.connect_timeout_secs = 30;
        config.key.dir = fixtures();
        config.key.identifier = "recipient_public".into();
        let silent = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(socket);
        });

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = stop_tx.send(());
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), start_until(&config, stop_rx))
            .await
            .expect("startup ignored the shutdown signal");
        assert!(outcome.unwrap().is_none());
        silent.abort();
    }

    #[tokio::test]
    async fn good_key_connects_and_subscribes_inbound() {
        let (broker_config, broker) = spawn_broker(0).await;
        let mut config = CourierConfig::default();
        config.broker = broker_config;
        config.key.dir = fixtures();
        config.key.identifier = "recipient_public".into();

        let node = start(&config).await.unwrap();
        assert_eq!(node.session.channel(), config.channels.outbound);

        node.session.shutdown().await.unwrap();
        node.inbound.await.unwrap();

        let seen = broker.await.unwrap();
        assert!(matches!(seen[0], Packet::Connect { .. }));
        assert!(matches!(&seen[1], Packet::Subscribe { topic, .. } if *topic == config.channels.inbound));
    }
}
