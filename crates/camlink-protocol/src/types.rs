//! Core protocol vocabulary: ids, packet types, video states, flags.
//!
//! Everything here is a direct mapping of numeric wire values to typed
//! Rust. The protocol predates this client by many years; the numbers
//! are fixed by the servers and must match exactly.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Offset separating the room-id space from the user-id space.
///
/// A performer's chat room has id `user_id + ROOM_ID_OFFSET`. Routing
/// fields may carry either form; [`to_user_id`] / [`to_room_id`]
/// normalize between them.
pub const ROOM_ID_OFFSET: u32 = 100_000_000;

/// Protocol revision sent in `arg1` of the login command.
pub const LOGIN_VERSION: i32 = 20_080_910;

/// A platform user id, stable across sessions and shared by every
/// server in the pool.
///
/// Serialized transparently so a `UserId(42)` is just `42` on the wire
/// and inside payload JSON.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u32);

impl UserId {
    /// Builds a `UserId` from a raw routing field, normalizing room ids
    /// down to the user-id space.
    pub fn from_raw(raw: u32) -> Self {
        Self(to_user_id(raw))
    }

    /// The room id corresponding to this user.
    pub fn room_id(self) -> u32 {
        to_room_id(self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// One observed connection instance for a user.
///
/// Session ids are allocated by the servers and strictly increase over
/// time, which is what makes "highest id wins" a usable tie-break.
/// `SessionId(0)` is the protocol's "no session" value, so `Default`
/// means exactly that.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Normalizes an id into the user-id space.
///
/// Ids at or above [`ROOM_ID_OFFSET`] are room ids and map down to the
/// owning user; ids below it pass through unchanged.
pub fn to_user_id(id: u32) -> u32 {
    if id >= ROOM_ID_OFFSET {
        id - ROOM_ID_OFFSET
    } else {
        id
    }
}

/// Normalizes an id into the room-id space (the inverse of
/// [`to_user_id`]). Used directly when sending join-room commands.
pub fn to_room_id(id: u32) -> u32 {
    if id < ROOM_ID_OFFSET {
        id + ROOM_ID_OFFSET
    } else {
        id
    }
}

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// Protocol message type.
///
/// The servers speak tens of types; only the ones below get special
/// handling in this client. Everything else decodes to
/// [`Other`](Self::Other) and passes through to subscribers untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// No-op. Sent by the client as the keepalive command.
    Null,
    /// Login handshake (client request and server reply share the type).
    Login,
    /// A friend of the logged-in user came online.
    FriendAdded,
    /// Private message between two users.
    PrivateMessage,
    /// Status update for a single user.
    Status,
    /// Incremental session detail update.
    Detail,
    /// Token tip inside a room.
    Tip,
    /// User lookup reply.
    UserLookup,
    /// Public chat message in a room.
    RoomChat,
    /// Full session-state snapshot for one session.
    SessionState,
    /// Join a room (outbound command; echoed inbound on success).
    JoinRoom,
    /// Leave a room.
    LeaveRoom,
    /// Room topic change.
    RoomTopic,
    /// Tag list for one entity.
    Tags,
    /// One batch of the initial roster listing.
    ListBatch,
    /// Roster-loading progress: `arg1` entries loaded of `arg2` total.
    Metrics,
    /// Any type this client does not special-case.
    Other(i32),
}

impl PacketType {
    /// Maps a raw wire code to a packet type. Unknown codes are kept,
    /// not rejected: the stream routinely carries types this client
    /// has no handling for.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Null,
            1 => Self::Login,
            2 => Self::FriendAdded,
            3 => Self::PrivateMessage,
            4 => Self::Status,
            5 => Self::Detail,
            6 => Self::Tip,
            10 => Self::UserLookup,
            20 => Self::RoomChat,
            30 => Self::SessionState,
            36 => Self::JoinRoom,
            37 => Self::LeaveRoom,
            47 => Self::RoomTopic,
            64 => Self::Tags,
            67 => Self::ListBatch,
            69 => Self::Metrics,
            other => Self::Other(other),
        }
    }

    /// The raw wire code for this type.
    pub fn code(self) -> i32 {
        match self {
            Self::Null => 0,
            Self::Login => 1,
            Self::FriendAdded => 2,
            Self::PrivateMessage => 3,
            Self::Status => 4,
            Self::Detail => 5,
            Self::Tip => 6,
            Self::UserLookup => 10,
            Self::RoomChat => 20,
            Self::SessionState => 30,
            Self::JoinRoom => 36,
            Self::LeaveRoom => 37,
            Self::RoomTopic => 47,
            Self::Tags => 64,
            Self::ListBatch => 67,
            Self::Metrics => 69,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "Other({code})"),
            known => write!(f, "{known:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// VideoState
// ---------------------------------------------------------------------------

/// Broadcast state of one session, from the `vs` payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoState {
    /// Broadcasting publicly.
    FreeChat,
    /// Broadcasting but marked away.
    Away,
    /// Transitioning into a private show.
    Confirming,
    /// In a private show.
    Private,
    /// In a group show.
    GroupShow,
    /// Connected and visible but not in a show state.
    Online,
    /// Session exists but reported no state.
    Null,
    /// Not broadcasting. The default for a freshly-created session and
    /// the state that makes a non-best session eligible for purge.
    Offline,
    /// A state code this client does not know.
    Unknown(i32),
}

impl VideoState {
    /// Maps a raw `vs` code to a state.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::FreeChat,
            2 => Self::Away,
            11 => Self::Confirming,
            12 => Self::Private,
            13 => Self::GroupShow,
            90 => Self::Online,
            126 => Self::Null,
            127 => Self::Offline,
            other => Self::Unknown(other),
        }
    }

    /// The raw wire code for this state.
    pub fn code(self) -> i32 {
        match self {
            Self::FreeChat => 0,
            Self::Away => 2,
            Self::Confirming => 11,
            Self::Private => 12,
            Self::GroupShow => 13,
            Self::Online => 90,
            Self::Null => 126,
            Self::Offline => 127,
            Self::Unknown(code) => code,
        }
    }

    /// Whether this state excludes the session from best-session
    /// selection and makes it purge-eligible.
    pub fn is_offline(self) -> bool {
        matches!(self, Self::Offline)
    }
}

// ---------------------------------------------------------------------------
// AccessLevel
// ---------------------------------------------------------------------------

/// User privilege level, from the `lv` payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    /// Anonymous guest.
    Guest,
    /// Registered, no tokens.
    Basic,
    /// Registered with tokens.
    Premium,
    /// A performer. The only level the merge engine tracks sessions for.
    Model,
    /// Site administration.
    Admin,
}

impl AccessLevel {
    /// Maps a raw `lv` code to a level, or `None` for codes outside the
    /// known range.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Guest),
            1 => Some(Self::Basic),
            2 => Some(Self::Premium),
            4 => Some(Self::Model),
            5 => Some(Self::Admin),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Model flags
// ---------------------------------------------------------------------------

/// Bit assignments of the `m.flags` field.
///
/// While a model-detail group is flattened onto a session, each bit is
/// also projected to a named boolean property so subscribers never have
/// to mask the raw field themselves.
pub mod flags {
    /// Private shows are "true private" (no spying).
    pub const TRUE_PRIVATE: i64 = 8;
    /// Guests cannot chat in this room.
    pub const GUESTS_MUTED: i64 = 16;
    /// Basic members cannot chat in this room.
    pub const BASICS_MUTED: i64 = 32;
    /// The session is run by the platform's operator software. Such a
    /// session is authoritative over manual/legacy sessions for the
    /// same model.
    pub const MODEL_SW: i64 = 64;
}

// =========================================================================
// Tests
// =========================================================================
