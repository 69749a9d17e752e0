//! Wire protocol for camlink.
//!
//! This crate defines the "language" the chat servers speak:
//!
//! - **Types** ([`PacketType`], [`VideoState`], [`UserId`], etc.) — the
//!   numeric vocabulary of the protocol and the id spaces it uses.
//! - **Packet** ([`Packet`], [`Payload`]) — one decoded frame, with its
//!   lazily-derived views (which entity it concerns, its chat text).
//! - **Framing** ([`BinaryFraming`], [`TextFraming`], [`FrameBuffer`]) —
//!   how packets are delimited on each transport variant, including
//!   partial-read reassembly.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while framing.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the entity
//! model (session state). It doesn't know about connections or
//! entities; it only knows how to turn byte streams into packets and
//! back.
//!
//! ```text
//! Transport (bytes) → Protocol (Packet) → Model (entity/session state)
//! ```

mod error;
mod framing;
mod packet;
mod types;

pub use error::ProtocolError;
pub use framing::{
    BinaryFraming, FrameBuffer, FramingKind, TextFraming, HEADER_LEN, MAGIC,
};
pub use packet::{Packet, Payload};
pub use types::{
    flags, to_room_id, to_user_id, AccessLevel, PacketType, SessionId,
    UserId, VideoState, LOGIN_VERSION, ROOM_ID_OFFSET,
};
