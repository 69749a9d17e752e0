//! The decoded unit of the protocol: one [`Packet`] per wire frame.
//!
//! A packet is immutable once decoded. Its derived views (which entity
//! it is about, its chat text) are computed on first access and cached
//! for the packet's lifetime, because the dispatch path asks for them
//! repeatedly (special-case handling, then every subscriber).

use std::fmt;
use std::sync::OnceLock;

use serde_json::Value;

use crate::types::{PacketType, UserId};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The body of a packet.
///
/// Payload text that parses as JSON becomes [`Json`](Self::Json);
/// anything else is kept verbatim as [`Text`](Self::Text). A payload
/// that fails to parse is never an error; plenty of types carry plain
/// strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A parsed JSON value.
    Json(Value),
    /// Raw payload text that was not valid JSON.
    Text(String),
    /// The frame declared no payload.
    None,
}

impl Payload {
    /// Parses payload text: JSON when possible, raw text otherwise.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text.to_string()),
        }
    }

    /// The parsed JSON value, if this payload is JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The raw text, if this payload failed the JSON parse.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Whether the frame carried no payload at all.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Convenience: a string field of a JSON payload.
    fn json_str(&self, key: &str) -> Option<&str> {
        self.as_json()?.get(key)?.as_str()
    }

    /// Convenience: an integer field of a JSON payload.
    fn json_i64(&self, key: &str) -> Option<i64> {
        self.as_json()?.get(key)?.as_i64()
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One decoded protocol frame.
///
/// The meaning of `from`, `to`, `arg1` and `arg2` depends entirely on
/// the packet type; [`about_user_id`](Self::about_user_id) encodes the
/// per-type knowledge of which field names the concerned entity.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Protocol message type.
    pub packet_type: PacketType,
    /// Routing field; sender id for user-to-user types.
    pub from: i32,
    /// Routing field; destination user or room id.
    pub to: i32,
    /// Type-dependent argument.
    pub arg1: i32,
    /// Type-dependent argument.
    pub arg2: i32,
    /// Decoded payload.
    pub payload: Payload,

    about: OnceLock<Option<UserId>>,
    plain_text: OnceLock<Option<String>>,
    chat_line: OnceLock<Option<String>>,
}

impl Packet {
    /// Builds a packet from decoded frame fields.
    pub fn new(
        packet_type: PacketType,
        from: i32,
        to: i32,
        arg1: i32,
        arg2: i32,
        payload: Payload,
    ) -> Self {
        Self {
            packet_type,
            from,
            to,
            arg1,
            arg2,
            payload,
            about: OnceLock::new(),
            plain_text: OnceLock::new(),
            chat_line: OnceLock::new(),
        }
    }

    /// The entity this packet concerns, if the type has one.
    ///
    /// Resolved through a fixed per-type table over the routing fields
    /// (room ids normalized to the user-id space). Computed once and
    /// cached.
    pub fn about_user_id(&self) -> Option<UserId> {
        *self.about.get_or_init(|| self.compute_about())
    }

    fn compute_about(&self) -> Option<UserId> {
        use PacketType::*;
        let raw = match self.packet_type {
            RoomChat | JoinRoom | LeaveRoom | RoomTopic | Tip => self.to,
            PrivateMessage | FriendAdded | Status | UserLookup => self.from,
            SessionState | Detail => self.arg2,
            Tags => {
                // A tags payload maps entity id → tag list; the single
                // key names the entity.
                let obj = self.payload.as_json()?.as_object()?;
                let key = obj.keys().next()?;
                return key.parse::<u32>().ok().map(UserId::from_raw);
            }
            _ => return None,
        };
        u32::try_from(raw).ok().filter(|&id| id > 0).map(UserId::from_raw)
    }

    /// The human-typed text of a chat, private message, or tip comment.
    ///
    /// This is the wire encoding of the text: emote shortcuts are NOT
    /// translated here (that needs the external emote codec).
    pub fn plain_text(&self) -> Option<&str> {
        self.plain_text
            .get_or_init(|| self.compute_plain_text())
            .as_deref()
    }

    fn compute_plain_text(&self) -> Option<String> {
        use PacketType::*;
        match self.packet_type {
            RoomChat | PrivateMessage | Tip => {
                self.payload.json_str("msg").map(str::to_string)
            }
            _ => None,
        }
    }

    /// A display-ready one-line rendering: `"name: text"` for chat and
    /// private messages, a tip description for tips.
    pub fn chat_line(&self) -> Option<&str> {
        self.chat_line
            .get_or_init(|| self.compute_chat_line())
            .as_deref()
    }

    fn compute_chat_line(&self) -> Option<String> {
        use PacketType::*;
        match self.packet_type {
            RoomChat | PrivateMessage => {
                let name = self.payload.json_str("nm").unwrap_or("unknown");
                let msg = self.payload.json_str("msg")?;
                Some(format!("{name}: {msg}"))
            }
            Tip => {
                let name = self.payload.json_str("nm").unwrap_or("unknown");
                let tokens = self.payload.json_i64("tokens").unwrap_or(0);
                Some(match self.payload.json_str("msg") {
                    Some(msg) if !msg.is_empty() => {
                        format!("{name} tipped {tokens} tokens: {msg}")
                    }
                    _ => format!("{name} tipped {tokens} tokens"),
                })
            }
            _ => None,
        }
    }
}

/// Equality over the wire fields only; derived caches don't participate.
impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.packet_type == other.packet_type
            && self.from == other.from
            && self.to == other.to
            && self.arg1 == other.arg1
            && self.arg2 == other.arg2
            && self.payload == other.payload
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[from={} to={} arg1={} arg2={}]",
            self.packet_type, self.from, self.to, self.arg1, self.arg2
        )
    }
}

// =========================================================================
// Tests
// =========================================================================
