//! Frame delimiting for both transport variants.
//!
//! The same packet stream arrives in two encodings, chosen per
//! connection:
//!
//! **Binary** (raw TCP): every frame starts with seven big-endian
//! 32-bit integers, followed by the payload text.
//!
//! ```text
//! ┌───────┬──────┬──────┬──────┬──────┬──────┬─────────────┬───────────────┐
//! │ magic │ type │ from │  to  │ arg1 │ arg2 │ payload_len │ payload bytes │
//! └───────┴──────┴──────┴──────┴──────┴──────┴─────────────┴───────────────┘
//!    4       4      4      4      4      4         4          payload_len
//! ```
//!
//! **Text** (WebSocket): a fixed-width ASCII decimal length tag, then
//! the frame body `type from to arg1 arg2[ payload]` space-separated,
//! payload percent-escaped.
//!
//! Both decoders work against a [`FrameBuffer`] that accumulates reads:
//! an incomplete frame consumes nothing and simply waits for the next
//! read, so one network read may yield zero, one, or many packets.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::ProtocolError;
use crate::packet::{Packet, Payload};
use crate::types::PacketType;

/// First header integer of every binary frame. Anything else means the
/// stream is desynchronized beyond recovery.
pub const MAGIC: i32 = -2027771392;

/// Binary frame header size: seven big-endian `i32`s.
pub const HEADER_LEN: usize = 28;

/// Width of the text variant's decimal length tag.
const LENGTH_TAG_LEN: usize = 6;

/// Characters that must be percent-escaped in a text-variant payload:
/// controls, the space separator, quotes, the escape character itself.
/// Non-ASCII is always escaped by the encoder.
const FRAME_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'%');

/// Which framing a connection uses, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingKind {
    /// 28-byte binary header (raw TCP transport).
    Binary,
    /// ASCII length tag + space-separated fields (WebSocket transport).
    Text,
}

// ---------------------------------------------------------------------------
// FrameBuffer
// ---------------------------------------------------------------------------

/// Accumulating read buffer with a consume cursor.
///
/// Decoders only advance the cursor over fully-decoded frames. Once
/// every buffered byte has been consumed the storage is reset to empty,
/// which bounds memory across a long-lived connection.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    cursor: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one network read.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// The not-yet-consumed bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.cursor..]
    }

    /// Whether everything buffered has been consumed.
    pub fn is_drained(&self) -> bool {
        self.cursor == self.buf.len()
    }

    /// Drops all buffered data, consumed or not.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.cursor = 0;
    }

    /// Marks `n` more bytes as consumed, resetting storage when drained.
    fn advance(&mut self, n: usize) {
        self.cursor += n;
        debug_assert!(self.cursor <= self.buf.len());
        if self.cursor == self.buf.len() {
            self.buf.clear();
            self.cursor = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// Binary framing
// ---------------------------------------------------------------------------

/// Encoder/decoder for the binary (raw TCP) frame layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryFraming;

impl BinaryFraming {
    /// Attempts to decode one frame from the buffer.
    ///
    /// Returns `Ok(None)` when fewer than a full frame is buffered; the
    /// buffer is left untouched and the caller retries after the next
    /// read. Returns an error only for an uninterpretable stream.
    pub fn decode_one(buf: &mut FrameBuffer) -> Result<Option<Packet>, ProtocolError> {
        let bytes = buf.remaining();
        if bytes.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut ints = [0i32; 7];
        for (i, item) in ints.iter_mut().enumerate() {
            let off = i * 4;
            *item = i32::from_be_bytes([
                bytes[off],
                bytes[off + 1],
                bytes[off + 2],
                bytes[off + 3],
            ]);
        }
        let [magic, type_code, from, to, arg1, arg2, payload_len] = ints;

        if magic != MAGIC {
            return Err(ProtocolError::BadMagic { found: magic });
        }
        let payload_len = usize::try_from(payload_len).map_err(|_| {
            ProtocolError::InvalidHeader(format!("negative payload length {payload_len}"))
        })?;

        if bytes.len() < HEADER_LEN + payload_len {
            // Declared payload extends past the buffer end.
            return Ok(None);
        }

        let payload = if payload_len > 0 {
            let text =
                String::from_utf8_lossy(&bytes[HEADER_LEN..HEADER_LEN + payload_len]);
            Payload::parse(&text)
        } else {
            Payload::None
        };
        buf.advance(HEADER_LEN + payload_len);

        Ok(Some(Packet::new(
            PacketType::from_code(type_code),
            from,
            to,
            arg1,
            arg2,
            payload,
        )))
    }

    /// Decodes every complete frame in the buffer, in order.
    ///
    /// Deliberately iterative: one large read can carry hundreds of
    /// frames and must not recurse per frame.
    pub fn decode_all(buf: &mut FrameBuffer) -> Result<Vec<Packet>, ProtocolError> {
        let mut packets = Vec::new();
        while let Some(packet) = Self::decode_one(buf)? {
            packets.push(packet);
        }
        Ok(packets)
    }

    /// Encodes one outgoing command frame.
    pub fn encode(
        packet_type: PacketType,
        to: i32,
        arg1: i32,
        arg2: i32,
        payload: Option<&str>,
    ) -> Vec<u8> {
        let payload_bytes = payload.unwrap_or("").as_bytes();
        let mut frame = Vec::with_capacity(HEADER_LEN + payload_bytes.len());
        for value in [
            MAGIC,
            packet_type.code(),
            0, // `from` is assigned server-side
            to,
            arg1,
            arg2,
            payload_bytes.len() as i32,
        ] {
            frame.extend_from_slice(&value.to_be_bytes());
        }
        frame.extend_from_slice(payload_bytes);
        frame
    }
}

// ---------------------------------------------------------------------------
// Text framing
// ---------------------------------------------------------------------------

/// Encoder/decoder for the text (WebSocket) frame layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFraming;

impl TextFraming {
    /// Attempts to decode one frame from the buffer.
    ///
    /// Same contract as [`BinaryFraming::decode_one`]: an incomplete
    /// frame (including a partially-received length tag) consumes
    /// nothing.
    pub fn decode_one(buf: &mut FrameBuffer) -> Result<Option<Packet>, ProtocolError> {
        let bytes = buf.remaining();
        if bytes.len() < LENGTH_TAG_LEN {
            return Ok(None);
        }

        let tag = std::str::from_utf8(&bytes[..LENGTH_TAG_LEN])
            .map_err(|_| ProtocolError::InvalidLengthTag(lossy(&bytes[..LENGTH_TAG_LEN])))?;
        let frame_len: usize = tag
            .parse()
            .map_err(|_| ProtocolError::InvalidLengthTag(tag.to_string()))?;

        if bytes.len() < LENGTH_TAG_LEN + frame_len {
            // Declared length exceeds what is buffered; keep the tag.
            return Ok(None);
        }

        let body = String::from_utf8_lossy(
            &bytes[LENGTH_TAG_LEN..LENGTH_TAG_LEN + frame_len],
        )
        .into_owned();
        let packet = Self::parse_body(&body)?;
        buf.advance(LENGTH_TAG_LEN + frame_len);
        Ok(Some(packet))
    }

    /// Decodes every complete frame in the buffer, in order.
    pub fn decode_all(buf: &mut FrameBuffer) -> Result<Vec<Packet>, ProtocolError> {
        let mut packets = Vec::new();
        while let Some(packet) = Self::decode_one(buf)? {
            packets.push(packet);
        }
        Ok(packets)
    }

    fn parse_body(body: &str) -> Result<Packet, ProtocolError> {
        let mut parts = body.splitn(6, ' ');
        let mut next_int = |name: &str| -> Result<i32, ProtocolError> {
            parts
                .next()
                .ok_or_else(|| {
                    ProtocolError::MalformedFrame(format!("missing {name} field"))
                })?
                .parse::<i32>()
                .map_err(|_| {
                    ProtocolError::MalformedFrame(format!("non-numeric {name} field"))
                })
        };

        let type_code = next_int("type")?;
        let from = next_int("from")?;
        let to = next_int("to")?;
        let arg1 = next_int("arg1")?;
        let arg2 = next_int("arg2")?;

        let payload = match parts.next() {
            Some(raw) if !raw.is_empty() => {
                let unescaped = percent_decode_str(raw).decode_utf8_lossy();
                Payload::parse(&unescaped)
            }
            _ => Payload::None,
        };

        Ok(Packet::new(
            PacketType::from_code(type_code),
            from,
            to,
            arg1,
            arg2,
            payload,
        ))
    }

    /// Encodes one outgoing command frame.
    ///
    /// The payload is percent-escaped (spaces become `%20`) so the body
    /// stays space-separable, then the whole frame is length-prefixed.
    pub fn encode(
        packet_type: PacketType,
        to: i32,
        arg1: i32,
        arg2: i32,
        payload: Option<&str>,
    ) -> String {
        let mut body = format!("{} 0 {to} {arg1} {arg2}", packet_type.code());
        if let Some(text) = payload {
            body.push(' ');
            body.push_str(&utf8_percent_encode(text, FRAME_ESCAPE).to_string());
        }
        format!("{:0width$}{body}", body.len(), width = LENGTH_TAG_LEN)
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// =========================================================================
// Tests
// =========================================================================
