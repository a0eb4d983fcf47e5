//! MQTT 3.1.1 client implementing [`Transport`].
//!
//! Task layout once connected:
//! - writer: sole owner of the socket's write half; writes whole packets
//!   in queue order, so a cancelled caller never leaves half a packet behind
//! - reader: decodes inbound packets, routes PUBLISH payloads to inboxes and
//!   resolves SUBACK/UNSUBACK waiters
//! - keepalive: PINGREQ at half the negotiated keepalive

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use courier_core::config::BrokerConfig;
use courier_services::{Inbox, Subscriptions, Transport, TransportError};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::codec::{CodecError, Packet, SUBACK_FAILURE};

const READ_BUFFER: usize = 4096;

enum WriterCommand {
    Send {
        bytes: Bytes,
        written: Option<oneshot::Sender<io::Result<()>>>,
    },
    Close(oneshot::Sender<()>),
}

type AckWaiters = Arc<DashMap<u16, oneshot::Sender<Packet>>>;

pub struct MqttTransport {
    writer: mpsc::UnboundedSender<WriterCommand>,
    subscriptions: Subscriptions,
    acks: AckWaiters,
    next_packet_id: AtomicU16,
    closed: Arc<AtomicBool>,
    ack_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Open a TCP connection, send CONNECT, and wait for an accepting CONNACK.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let addr = format!("{}:{}", config.address, config.port);

        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Connection(format!("timed out connecting to {addr}")))?
            .map_err(|e| TransportError::Connection(format!("{addr}: {e}")))?;
        stream.set_nodelay(true).ok();

        let connect = Packet::Connect {
            client_id: config.client_id.clone(),
            keepalive_secs: config.keepalive_secs,
            clean_session: true,
        };
        stream
            .write_all(&encode(&connect)?)
            .await
            .map_err(|e| TransportError::Connection(format!("sending CONNECT: {e}")))?;

        let mut buf = BytesMut::with_capacity(READ_BUFFER);
        let connack = tokio::time::timeout(timeout, read_packet(&mut stream, &mut buf))
            .await
            .map_err(|_| TransportError::Connection("timed out waiting for CONNACK".into()))??;
        match connack {
            Packet::ConnAck { return_code: 0, .. } => {}
            Packet::ConnAck { return_code, .. } => {
                return Err(TransportError::Connection(format!(
                    "broker refused connection: {}",
                    connack_reason(return_code)
                )));
            }
            other => {
                return Err(TransportError::Connection(format!(
                    "expected CONNACK, got {other:?}"
                )));
            }
        }
        tracing::info!(broker = %addr, keepalive_secs = config.keepalive_secs, "connected to broker");

        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let subscriptions = Subscriptions::new();
        let acks: AckWaiters = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let mut tasks = vec![
            tokio::spawn(writer_loop(write_half, writer_rx)),
            tokio::spawn(reader_loop(
                read_half,
                buf,
                writer_tx.clone(),
                subscriptions.clone(),
                acks.clone(),
                closed.clone(),
            )),
        ];
        if config.keepalive_secs > 0 {
            let interval = Duration::from_secs(u64::from(config.keepalive_secs)) / 2;
            tasks.push(tokio::spawn(keepalive_loop(writer_tx.clone(), interval)));
        }

        Ok(Self {
            writer: writer_tx,
            subscriptions,
            acks,
            next_packet_id: AtomicU16::new(1),
            closed,
            ack_timeout: timeout,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Non-zero packet identifier, wrapping.
    fn packet_id(&self) -> u16 {
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Queue `bytes` and wait until the writer has put them on the socket.
    async fn write(&self, bytes: Bytes) -> Result<(), String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err("connection closed".into());
        }
        let (tx, rx) = oneshot::channel();
        self.writer
            .send(WriterCommand::Send {
                bytes,
                written: Some(tx),
            })
            .map_err(|_| "writer stopped".to_string())?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("writer stopped".into()),
        }
    }

    /// Send a packet that expects an acknowledgement keyed by `packet_id`.
    async fn request(&self, packet_id: u16, packet: &Packet) -> Result<Packet, String> {
        let bytes = packet.to_bytes().map_err(|e| e.to_string())?;
        let (tx, rx) = oneshot::channel();
        self.acks.insert(packet_id, tx);

        let result = match self.write(bytes).await {
            Err(reason) => Err(reason),
            Ok(()) => match tokio::time::timeout(self.ack_timeout, rx).await {
                Ok(Ok(ack)) => Ok(ack),
                Ok(Err(_)) => Err("connection closed before acknowledgement".to_string()),
                Err(_) => Err("timed out waiting for acknowledgement".to_string()),
            },
        };
        self.acks.remove(&packet_id);
        result
    }
}

impl Transport for MqttTransport {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let len = payload.len();
        let packet = Packet::Publish {
            topic: channel.to_string(),
            qos: 0,
            retain: false,
            packet_id: None,
            payload,
        };
        let publish_error = |reason: String| TransportError::Publish {
            channel: channel.to_string(),
            reason,
        };
        let bytes = packet.to_bytes().map_err(|e| publish_error(e.to_string()))?;
        self.write(bytes).await.map_err(publish_error)?;
        tracing::debug!(channel, len, "PUBLISH written");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Inbox, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let subscribe_error = |reason: String| TransportError::Subscribe {
            channel: channel.to_string(),
            reason,
        };

        // Open the inbox first so nothing published right after SUBACK is lost.
        let inbox = self.subscriptions.open(channel);
        let packet_id = self.packet_id();
        let packet = Packet::Subscribe {
            packet_id,
            topic: channel.to_string(),
            qos: 0,
        };
        let outcome = match self.request(packet_id, &packet).await {
            Ok(Packet::SubAck { return_codes, .. })
                if return_codes.first().is_some_and(|c| *c != SUBACK_FAILURE) =>
            {
                Ok(())
            }
            Ok(Packet::SubAck { .. }) => Err("broker refused subscription".to_string()),
            Ok(other) => Err(format!("unexpected acknowledgement {other:?}")),
            Err(reason) => Err(reason),
        };
        if let Err(reason) = outcome {
            self.subscriptions.close(channel);
            return Err(subscribe_error(reason));
        }
        tracing::info!(channel, "subscribed");
        Ok(inbox)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        // The inbox closes immediately; the broker is told afterwards.
        self.subscriptions.close(channel);
        if !self.is_connected() {
            return Ok(());
        }
        let packet_id = self.packet_id();
        let packet = Packet::Unsubscribe {
            packet_id,
            topic: channel.to_string(),
        };
        match self.request(packet_id, &packet).await {
            Ok(_) => {
                tracing::info!(channel, "unsubscribed");
                Ok(())
            }
            Err(reason) => Err(TransportError::Subscribe {
                channel: channel.to_string(),
                reason,
            }),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // The reader also sets `closed` when the broker drops us; the task
        // list tells whether teardown already ran.
        let was_open = !self.closed.swap(true, Ordering::SeqCst);
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if tasks.is_empty() {
            return Ok(());
        }

        if was_open {
            let (written_tx, written_rx) = oneshot::channel();
            let disconnect = encode(&Packet::Disconnect)?;
            let _ = self.writer.send(WriterCommand::Send {
                bytes: disconnect,
                written: Some(written_tx),
            });
            if let Ok(Err(e)) = written_rx.await {
                tracing::warn!(error = %e, "failed to send DISCONNECT");
            }
        }
        let (closed_tx, closed_rx) = oneshot::channel();
        if self.writer.send(WriterCommand::Close(closed_tx)).is_ok() {
            let _ = closed_rx.await;
        }

        for task in tasks {
            task.abort();
        }
        self.subscriptions.close_all();
        self.acks.clear();
        tracing::info!("disconnected from broker");
        Ok(())
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

async fn writer_loop(mut socket: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Send { bytes, written } => {
                // The caller was cancelled before its turn came; keep the
                // packet off the wire so the record and the broker agree.
                if written.as_ref().is_some_and(|w| w.is_closed()) {
                    tracing::debug!(len = bytes.len(), "caller gone, queued packet dropped");
                    continue;
                }
                let result = socket.write_all(&bytes).await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "socket write failed");
                }
                if let Some(written) = written {
                    let _ = written.send(result);
                }
            }
            WriterCommand::Close(done) => {
                let _ = socket.shutdown().await;
                let _ = done.send(());
                break;
            }
        }
    }
    tracing::debug!("writer stopped");
}

async fn reader_loop(
    mut socket: OwnedReadHalf,
    mut buf: BytesMut,
    writer: mpsc::UnboundedSender<WriterCommand>,
    subscriptions: Subscriptions,
    acks: AckWaiters,
    closed: Arc<AtomicBool>,
) {
    loop {
        let packet = match read_packet(&mut socket, &mut buf).await {
            Ok(packet) => packet,
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    tracing::error!(error = %e, "broker connection lost");
                }
                break;
            }
        };
        match packet {
            Packet::Publish {
                topic,
                qos,
                packet_id,
                payload,
                ..
            } => {
                if qos == 1 {
                    if let Some(packet_id) = packet_id {
                        let ack = Packet::PubAck { packet_id };
                        if let Ok(bytes) = ack.to_bytes() {
                            let _ = writer.send(WriterCommand::Send {
                                bytes,
                                written: None,
                            });
                        }
                    }
                }
                if !subscriptions.route(&topic, payload) {
                    tracing::debug!(topic = %topic, "PUBLISH for unsubscribed topic dropped");
                }
            }
            Packet::SubAck { packet_id, .. } | Packet::UnsubAck { packet_id } => {
                match acks.remove(&packet_id) {
                    Some((_, waiter)) => {
                        let _ = waiter.send(packet);
                    }
                    None => tracing::debug!(packet_id, "late acknowledgement ignored"),
                }
            }
            Packet::PingResp => tracing::trace!("PINGRESP"),
            other => tracing::warn!(packet = ?other, "unexpected packet from broker"),
        }
    }

    closed.store(true, Ordering::SeqCst);
    subscriptions.close_all();
    acks.clear();
}

async fn keepalive_loop(writer: mpsc::UnboundedSender<WriterCommand>, interval: Duration) {
    let Ok(ping) = Packet::PingReq.to_bytes() else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let command = WriterCommand::Send {
            bytes: ping.clone(),
            written: None,
        };
        if writer.send(command).is_err() {
            break;
        }
        tracing::trace!("PINGREQ queued");
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub(super) enum ReadError {
    #[error("connection closed by broker")]
    Eof,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<ReadError> for TransportError {
    fn from(e: ReadError) -> Self {
        TransportError::Connection(e.to_string())
    }
}

pub(super) async fn read_packet<R>(socket: &mut R, buf: &mut BytesMut) -> Result<Packet, ReadError>
where
    R: AsyncReadExt + Unpin,
{
    loop {
        if let Some(packet) = Packet::decode(buf)? {
            return Ok(packet);
        }
        if socket.read_buf(buf).await? == 0 {
            return Err(ReadError::Eof);
        }
    }
}

fn encode(packet: &Packet) -> Result<Bytes, TransportError> {
    packet
        .to_bytes()
        .map_err(|e| TransportError::Connection(e.to_string()))
}

fn connack_reason(code: u8) -> &'static str {
    match code {
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
