//! MQTT 3.1.1 packet codec — the subset a publishing client needs.
//!
//! Fixed header layout (every packet):
//!
//! ```text
//!  7     4 3     0
//! ┌───────┬───────┐
//! │ type  │ flags │  byte 0
//! ├───────┴───────┤
//! │ remaining len │  1–4 bytes, 7 bits each, LSB group first,
//! │   (varint)    │  high bit = continuation
//! └───────────────┘
//! ```
//!
//! Strings are a big-endian u16 length followed by UTF-8 bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Largest value the four-byte remaining-length field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const CLEAN_SESSION: u8 = 0x02;

/// SUBACK return code for a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

mod kind {
    pub const CONNECT: u8 = 1;
    pub const CONNACK: u8 = 2;
    pub const PUBLISH: u8 = 3;
    pub const PUBACK: u8 = 4;
    pub const SUBSCRIBE: u8 = 8;
    pub const SUBACK: u8 = 9;
    pub const UNSUBSCRIBE: u8 = 10;
    pub const UNSUBACK: u8 = 11;
    pub const PINGREQ: u8 = 12;
    pub const PINGRESP: u8 = 13;
    pub const DISCONNECT: u8 = 14;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_id: String,
        keepalive_secs: u16,
        clean_session: bool,
    },
    ConnAck {
        session_present: bool,
        return_code: u8,
    },
    /// `packet_id` is present exactly when `qos > 0`.
    Publish {
        topic: String,
        qos: u8,
        retain: bool,
        packet_id: Option<u16>,
        payload: Bytes,
    },
    PubAck {
        packet_id: u16,
    },
    /// Single topic filter. Only the first filter of a multi-filter
    /// SUBSCRIBE is kept on decode.
    Subscribe {
        packet_id: u16,
        topic: String,
        qos: u8,
    },
    SubAck {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    Unsubscribe {
        packet_id: u16,
        topic: String,
    },
    UnsubAck {
        packet_id: u16,
    },
    PingReq,
    PingResp,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("remaining length field longer than four bytes")]
    MalformedRemainingLength,
    #[error("packet body of {0} bytes exceeds the MQTT limit of {MAX_REMAINING_LENGTH}")]
    PacketTooLarge(usize),
    #[error("string of {0} bytes does not fit a u16 length prefix")]
    StringTooLong(usize),
    #[error("unsupported packet type {0}")]
    UnknownPacketType(u8),
    #[error("invalid QoS {0}")]
    InvalidQos(u8),
    #[error("invalid fixed header flags 0x{flags:x} for packet type {kind}")]
    InvalidFlags { kind: u8, flags: u8 },
    #[error("packet truncated while reading {0}")]
    Truncated(&'static str),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

// ── Remaining length ──────────────────────────────────────────────────────────

fn put_remaining_length(mut len: usize, dst: &mut BytesMut) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Returns `(value, field_len)`, or `None` when more bytes are needed.
fn read_remaining_length(src: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in src.iter().enumerate().take(4) {
        value += (*byte & 0x7f) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if src.len() >= 4 {
        return Err(CodecError::MalformedRemainingLength);
    }
    Ok(None)
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn put_str(s: &str, dst: &mut BytesMut) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| CodecError::StringTooLong(s.len()))?;
    dst.put_u16(len);
    dst.put_slice(s.as_bytes());
    Ok(())
}

fn take_u8(buf: &mut Bytes, what: &'static str) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut Bytes, what: &'static str) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_u16())
}

fn take_str(buf: &mut Bytes, what: &'static str) -> Result<String, CodecError> {
    let len = take_u16(buf, what)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated(what));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

fn check_qos(qos: u8) -> Result<u8, CodecError> {
    if qos > 2 {
        return Err(CodecError::InvalidQos(qos));
    }
    Ok(qos)
}

// ── Encode / decode ───────────────────────────────────────────────────────────

impl Packet {
    /// Append the encoded packet to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), CodecError> {
        let mut body = BytesMut::new();
        let first = match self {
            Packet::Connect {
                client_id,
                keepalive_secs,
                clean_session,
            } => {
                put_str(PROTOCOL_NAME, &mut body)?;
                body.put_u8(PROTOCOL_LEVEL);
                body.put_u8(if *clean_session { CLEAN_SESSION } else { 0 });
                body.put_u16(*keepalive_secs);
                put_str(client_id, &mut body)?;
                kind::CONNECT << 4
            }
            Packet::ConnAck {
                session_present,
                return_code,
            } => {
                body.put_u8(u8::from(*session_present));
                body.put_u8(*return_code);
                kind::CONNACK << 4
            }
            Packet::Publish {
                topic,
                qos,
                retain,
                packet_id,
                payload,
            } => {
                let qos = check_qos(*qos)?;
                put_str(topic, &mut body)?;
                if qos > 0 {
                    body.put_u16(packet_id.unwrap_or_default());
                }
                body.put_slice(payload);
                (kind::PUBLISH << 4) | (qos << 1) | u8::from(*retain)
            }
            Packet::PubAck { packet_id } => {
                body.put_u16(*packet_id);
                kind::PUBACK << 4
            }
            Packet::Subscribe {
                packet_id,
                topic,
                qos,
            } => {
                body.put_u16(*packet_id);
                put_str(topic, &mut body)?;
                body.put_u8(check_qos(*qos)?);
                (kind::SUBSCRIBE << 4) | 0x02
            }
            Packet::SubAck {
                packet_id,
                return_codes,
            } => {
                body.put_u16(*packet_id);
                body.put_slice(return_codes);
                kind::SUBACK << 4
            }
            Packet::Unsubscribe { packet_id, topic } => {
                body.put_u16(*packet_id);
                put_str(topic, &mut body)?;
                (kind::UNSUBSCRIBE << 4) | 0x02
            }
            Packet::UnsubAck { packet_id } => {
                body.put_u16(*packet_id);
                kind::UNSUBACK << 4
            }
            Packet::PingReq => kind::PINGREQ << 4,
            Packet::PingResp => kind::PINGRESP << 4,
            Packet::Disconnect => kind::DISCONNECT << 4,
        };

        if body.len() > MAX_REMAINING_LENGTH {
            return Err(CodecError::PacketTooLarge(body.len()));
        }
        dst.reserve(1 + 4 + body.len());
        dst.put_u8(first);
        put_remaining_length(body.len(), dst);
        dst.put_slice(&body);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Take one whole packet off the front of `src`. Returns `Ok(None)` and
    /// leaves `src` untouched when the packet is not complete yet.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        if src.is_empty() {
            return Ok(None);
        }
        let Some((body_len, field_len)) = read_remaining_length(&src[1..])? else {
            return Ok(None);
        };
        let header_len = 1 + field_len;
        if src.len() < header_len + body_len {
            return Ok(None);
        }

        let first = src[0];
        src.advance(header_len);
        let mut body = src.split_to(body_len).freeze();
        let (packet_type, flags) = (first >> 4, first & 0x0f);

        let expect_flags = |expected: u8| {
            if flags == expected {
                Ok(())
            } else {
                Err(CodecError::InvalidFlags {
                    kind: packet_type,
                    flags,
                })
            }
        };

        let packet = match packet_type {
            kind::CONNECT => {
                expect_flags(0)?;
                let _protocol = take_str(&mut body, "protocol name")?;
                let _level = take_u8(&mut body, "protocol level")?;
                let connect_flags = take_u8(&mut body, "connect flags")?;
                let keepalive_secs = take_u16(&mut body, "keepalive")?;
                let client_id = take_str(&mut body, "client id")?;
                Packet::Connect {
                    client_id,
                    keepalive_secs,
                    clean_session: connect_flags & CLEAN_SESSION != 0,
                }
            }
            kind::CONNACK => {
                expect_flags(0)?;
                let ack_flags = take_u8(&mut body, "connack flags")?;
                let return_code = take_u8(&mut body, "connack return code")?;
                Packet::ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    return_code,
                }
            }
            kind::PUBLISH => {
                let qos = check_qos((flags >> 1) & 0x03)?;
                let topic = take_str(&mut body, "topic")?;
                let packet_id = if qos > 0 {
                    Some(take_u16(&mut body, "packet id")?)
                } else {
                    None
                };
                Packet::Publish {
                    topic,
                    qos,
                    retain: flags & 0x01 != 0,
                    packet_id,
                    payload: body,
                }
            }
            kind::PUBACK => {
                expect_flags(0)?;
                Packet::PubAck {
                    packet_id: take_u16(&mut body, "packet id")?,
                }
            }
            kind::SUBSCRIBE => {
                expect_flags(0x02)?;
                let packet_id = take_u16(&mut body, "packet id")?;
                let topic = take_str(&mut body, "topic filter")?;
                let qos = check_qos(take_u8(&mut body, "requested qos")?)?;
                Packet::Subscribe {
                    packet_id,
                    topic,
                    qos,
                }
            }
            kind::SUBACK => {
                expect_flags(0)?;
                let packet_id = take_u16(&mut body, "packet id")?;
                Packet::SubAck {
                    packet_id,
                    return_codes: body.to_vec(),
                }
            }
            kind::UNSUBSCRIBE => {
                expect_flags(0x02)?;
                let packet_id = take_u16(&mut body, "packet id")?;
                let topic = take_str(&mut body, "topic filter")?;
                Packet::Unsubscribe { packet_id, topic }
            }
            kind::UNSUBACK => {
                expect_flags(0)?;
                Packet::UnsubAck {
                    packet_id: take_u16(&mut body, "packet id")?,
                }
            }
            kind::PINGREQ => Packet::PingReq,
            kind::PINGRESP => Packet::PingResp,
            kind::DISCONNECT => Packet::Disconnect,
            other => return Err(CodecError::UnknownPacketType(other)),
        };
        Ok(Some(packet))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
