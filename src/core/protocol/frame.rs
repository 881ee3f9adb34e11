//! Binary frame codec for the dialogue service.
//!
//! # Wire Layout
//!
//! ```text
//! byte 0   : protocol version (high nibble, = 1) | header size in 4-byte words (low nibble, = 1)
//! byte 1   : message type (high nibble)          | message type flags (low nibble)
//! byte 2   : serialization (high nibble)         | compression (low nibble, always 0)
//! byte 3   : reserved (0x00)
//! [u32 BE] : event ID                 -- only when flags & 0x04
//! [u32 BE] : session ID length        -- only when event ID >= 100
//! [bytes]  : session ID (UTF-8)
//! [u32 BE] : payload length
//! [bytes]  : payload (JSON text or raw audio)
//! ```
//!
//! All integers are big-endian. Decoding never reads past the end of the
//! buffer: a declared length that would overrun it is a
//! [`RelayError::MalformedFrame`].

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use super::events::{ClientEvent, ServerEvent, carries_session_id};
use crate::core::error::{RelayError, RelayResult};

/// Protocol version written into every header.
pub const PROTOCOL_VERSION: u8 = 0b0001;

/// Header size in 4-byte words written into every header.
pub const HEADER_SIZE_WORDS: u8 = 0b0001;

/// Message-type flag bit signalling that an event ID follows the header.
pub const FLAG_EVENT_ID: u8 = 0b0100;

const HEADER_LEN: usize = 4;

// =============================================================================
// Header Enums
// =============================================================================

/// Message type carried in the high nibble of header byte 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Full client request with a serialized payload
    FullClientRequest,
    /// Client request carrying raw audio
    AudioOnlyRequest,
    /// Full server response with a serialized payload
    FullServerResponse,
    /// Server response carrying raw audio
    AudioOnlyResponse,
    /// Server error response
    Error,
    /// Any other 4-bit value
    Other(u8),
}

impl MessageType {
    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0b0001 => Self::FullClientRequest,
            0b0010 => Self::AudioOnlyRequest,
            0b1001 => Self::FullServerResponse,
            0b1011 => Self::AudioOnlyResponse,
            0b1111 => Self::Error,
            other => Self::Other(other),
        }
    }

    pub fn as_nibble(self) -> u8 {
        match self {
            Self::FullClientRequest => 0b0001,
            Self::AudioOnlyRequest => 0b0010,
            Self::FullServerResponse => 0b1001,
            Self::AudioOnlyResponse => 0b1011,
            Self::Error => 0b1111,
            Self::Other(value) => value & 0x0F,
        }
    }
}

/// Serialization method carried in the high nibble of header byte 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    /// Raw bytes, no serialization
    Raw,
    /// UTF-8 JSON
    Json,
    /// Raw audio bytes
    Audio,
    /// Any other 4-bit value
    Other(u8),
}

impl Serialization {
    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0 => Self::Raw,
            1 => Self::Json,
            2 => Self::Audio,
            other => Self::Other(other),
        }
    }

    pub fn as_nibble(self) -> u8 {
        match self {
            Self::Raw => 0,
            Self::Json => 1,
            Self::Audio => 2,
            Self::Other(value) => value & 0x0F,
        }
    }
}

// =============================================================================
// Payload
// =============================================================================

/// Decoded frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Zero-length JSON payload
    Empty,
    /// Parsed JSON document
    Json(Value),
    /// Raw bytes (audio or unserialized data)
    Binary(Bytes),
    /// Payload declared as JSON that failed to parse
    Unparsed(Bytes),
}

impl Payload {
    /// Bytes as they appear on the wire.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Payload::Empty => Bytes::new(),
            Payload::Json(value) => Bytes::from(value.to_string()),
            Payload::Binary(data) | Payload::Unparsed(data) => data.clone(),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Payload::Binary(data) => Some(data),
            _ => None,
        }
    }

    /// Look up a top-level string field of a JSON payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.as_json()?.get(key)?.as_str()
    }
}

// =============================================================================
// Frame
// =============================================================================

/// One binary unit on the upstream wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message_type: MessageType,
    pub flags: u8,
    pub serialization: Serialization,
    pub event_id: Option<u32>,
    pub session_id: Option<String>,
    pub payload: Payload,
}

impl Frame {
    /// Full client request carrying a JSON payload for `event`.
    ///
    /// The session ID is attached only for session-scoped events.
    pub fn client_event(event: ClientEvent, session_id: Option<&str>, payload: Value) -> Self {
        let session_id = session_id
            .filter(|_| event.carries_session_id())
            .map(str::to_string);

        Self {
            message_type: MessageType::FullClientRequest,
            flags: FLAG_EVENT_ID,
            serialization: Serialization::Json,
            event_id: Some(event.id()),
            session_id,
            payload: Payload::Json(payload),
        }
    }

    /// Audio-only `TaskRequest` frame carrying raw PCM bytes verbatim.
    pub fn audio_request(session_id: &str, audio: Bytes) -> Self {
        Self {
            message_type: MessageType::AudioOnlyRequest,
            flags: FLAG_EVENT_ID,
            serialization: Serialization::Raw,
            event_id: Some(ClientEvent::TaskRequest.id()),
            session_id: Some(session_id.to_string()),
            payload: Payload::Binary(audio),
        }
    }

    #[inline]
    pub fn has_event_id_flag(&self) -> bool {
        self.flags & FLAG_EVENT_ID != 0
    }

    /// The server event this frame reports, if it is a known one.
    pub fn server_event(&self) -> Option<ServerEvent> {
        self.event_id.and_then(ServerEvent::from_id)
    }

    /// Serialize the frame to its wire representation.
    pub fn encode(&self) -> Bytes {
        let payload = self.payload.to_bytes();
        let session_bytes = self.session_field();

        let mut buf = BytesMut::with_capacity(
            HEADER_LEN
                + 4
                + session_bytes.map_or(0, |s| 4 + s.len())
                + 4
                + payload.len(),
        );

        buf.put_u8((PROTOCOL_VERSION << 4) | HEADER_SIZE_WORDS);
        buf.put_u8((self.message_type.as_nibble() << 4) | (self.flags & 0x0F));
        // Compression nibble stays 0
        buf.put_u8(self.serialization.as_nibble() << 4);
        buf.put_u8(0x00);

        if self.has_event_id_flag() {
            buf.put_u32(self.event_id.unwrap_or_default());
        }

        if let Some(session) = session_bytes {
            buf.put_u32(session.len() as u32);
            buf.put_slice(session);
        }

        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);

        buf.freeze()
    }

    /// Parse a frame from its wire representation.
    pub fn decode(buf: &[u8]) -> RelayResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(RelayError::MalformedFrame(format!(
                "frame of {} bytes is shorter than the {HEADER_LEN}-byte header",
                buf.len()
            )));
        }

        let version = buf[0] >> 4;
        if version != PROTOCOL_VERSION {
            return Err(RelayError::MalformedFrame(format!(
                "unsupported protocol version {version}"
            )));
        }

        let header_len = (buf[0] & 0x0F) as usize * 4;
        if header_len == 0 {
            return Err(RelayError::MalformedFrame("header size of zero".to_string()));
        }

        let message_type = MessageType::from_nibble(buf[1] >> 4);
        let flags = buf[1] & 0x0F;
        let serialization = Serialization::from_nibble(buf[2] >> 4);

        let mut reader = FrameReader::new(buf);
        reader.skip(header_len, "header")?;

        let event_id = if flags & FLAG_EVENT_ID != 0 {
            Some(reader.read_u32("event ID")?)
        } else {
            None
        };

        let session_id = match event_id {
            Some(id) if carries_session_id(id) => {
                let len = reader.read_u32("session ID length")? as usize;
                let raw = reader.read_bytes(len, "session ID")?;
                let session = std::str::from_utf8(raw).map_err(|e| {
                    RelayError::MalformedFrame(format!("session ID is not UTF-8: {e}"))
                })?;
                (!session.is_empty()).then(|| session.to_string())
            }
            _ => None,
        };

        let payload_len = reader.read_u32("payload length")? as usize;
        let raw = reader.read_bytes(payload_len, "payload")?;

        let payload = if message_type == MessageType::AudioOnlyResponse {
            // Audio responses are binary whatever the serialization nibble says
            Payload::Binary(Bytes::copy_from_slice(raw))
        } else if serialization != Serialization::Json {
            Payload::Binary(Bytes::copy_from_slice(raw))
        } else if raw.is_empty() {
            Payload::Empty
        } else {
            match serde_json::from_slice::<Value>(raw) {
                Ok(value) => Payload::Json(value),
                Err(e) => {
                    tracing::debug!("JSON payload failed to parse, keeping raw bytes: {}", e);
                    Payload::Unparsed(Bytes::copy_from_slice(raw))
                }
            }
        };

        Ok(Self {
            message_type,
            flags,
            serialization,
            event_id,
            session_id,
            payload,
        })
    }

    /// Session ID bytes to write, if this frame's event carries the field.
    ///
    /// Session-scoped events always carry it; a missing ID is written with a
    /// zero length.
    fn session_field(&self) -> Option<&[u8]> {
        if !self.has_event_id_flag() {
            return None;
        }
        match self.event_id {
            Some(id) if carries_session_id(id) => {
                Some(self.session_id.as_deref().unwrap_or_default().as_bytes())
            }
            _ => None,
        }
    }
}

/// Bounds-checked cursor over a frame buffer.
struct FrameReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn read_bytes(&mut self, len: usize, field: &str) -> RelayResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(RelayError::MalformedFrame(format!(
                "{field} needs {len} bytes but only {} remain",
                self.remaining()
            )));
        }
        let start = self.offset;
        self.offset += len;
        Ok(&self.buf[start..self.offset])
    }

    fn skip(&mut self, len: usize, field: &str) -> RelayResult<()> {
        self.read_bytes(len, field).map(|_| ())
    }

    fn read_u32(&mut self, field: &str) -> RelayResult<u32> {
        let raw = self.read_bytes(4, field)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}
