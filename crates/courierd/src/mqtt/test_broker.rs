//! Single-client MQTT broker for tests.

use bytes::BytesMut;
use courier_core::config::BrokerConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::client::read_packet;
use super::codec::Packet;

/// Packet id the broker uses when echoing a PUBLISH back at QoS 1.
pub const ECHO_PACKET_ID: u16 = 77;

/// Accepts one client, acks CONNECT/SUBSCRIBE/UNSUBSCRIBE, answers PINGREQ,
/// and echoes every PUBLISH back at QoS 1. The handle resolves to every
/// packet received once the client disconnects.
pub async fn spawn_broker(connack_code: u8) -> (BrokerConfig, JoinHandle<Vec<Packet>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = BytesMut::new();
        let mut seen = Vec::new();
        while let Ok(packet) = read_packet(&mut socket, &mut buf).await {
            seen.push(packet.clone());
            let reply = match packet {
                Packet::Connect { .. } => Some(Packet::ConnAck {
                    session_present: false,
                    return_code: connack_code,
                }),
                Packet::Subscribe { packet_id, .. } => Some(Packet::SubAck {
                    packet_id,
                    return_codes: vec![0],
                }),
                Packet::Unsubscribe { packet_id, .. } => Some(Packet::UnsubAck { packet_id }),
                Packet::PingReq => Some(Packet::PingResp),
                Packet::Publish { topic, payload, .. } => Some(Packet::Publish {
                    topic,
                    qos: 1,
                    retain: false,
                    packet_id: Some(ECHO_PACKET_ID),
                    payload,
                }),
                Packet::Disconnect => break,
                _ => None,
            };
            if let Some(reply) = reply {
                if socket.write_all(&reply.to_bytes().unwrap()).await.is_err() {
                    break;
                }
            }
        }
        seen
    });

    let config = BrokerConfig {
        address: "127.0.0.1".into(),
        port,
        keepalive_secs: 120,
        client_id: "courier-test".into(),
        connect_timeout_secs: 5,
    };
    (config, handle)
}
