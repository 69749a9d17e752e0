//! The outbound command surface.
//!
//! Everything here funnels through [`Client::send_command`], which
//! encodes a frame for this connection's variant and writes it out.
//! Convenience methods cover the commands a typical integrator needs:
//! rooms, chat, private messages, user lookups.

use std::sync::atomic::Ordering;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use camlink_protocol::{
    to_room_id, BinaryFraming, FramingKind, PacketType, TextFraming, UserId,
};
use camlink_transport::{Connection, Transport};

use crate::client::Client;
use crate::error::ClientError;

impl<T: Transport> Client<T> {
    /// Sends one raw command frame.
    ///
    /// # Errors
    /// [`ClientError::NotConnected`] without an established connection;
    /// transport errors propagate.
    pub async fn send_command(
        &self,
        packet_type: PacketType,
        to: i32,
        arg1: i32,
        arg2: i32,
        payload: Option<&str>,
    ) -> Result<(), ClientError> {
        let conn = self
            .inner
            .conn
            .lock()
            .expect("conn lock")
            .clone()
            .ok_or(ClientError::NotConnected)?;
        match self.inner.transport.framing() {
            FramingKind::Binary => {
                let frame = BinaryFraming::encode(packet_type, to, arg1, arg2, payload);
                conn.send(&frame).await?;
            }
            FramingKind::Text => {
                let frame = TextFraming::encode(packet_type, to, arg1, arg2, payload);
                conn.send(frame.as_bytes()).await?;
            }
        }
        Ok(())
    }

    /// Joins a user's chat room (the id may be given in either id
    /// space).
    pub async fn join_room(&self, user_id: UserId) -> Result<(), ClientError> {
        self.send_command(PacketType::JoinRoom, to_room_id(user_id.0) as i32, 0, 0, None)
            .await
    }

    /// Leaves a user's chat room.
    pub async fn leave_room(&self, user_id: UserId) -> Result<(), ClientError> {
        self.send_command(PacketType::LeaveRoom, to_room_id(user_id.0) as i32, 0, 0, None)
            .await
    }

    /// Sends a public chat message to a user's room.
    ///
    /// The text runs through the emote codec first; a codec failure is
    /// logged and the text goes out unmodified.
    pub async fn send_chat(&self, user_id: UserId, text: &str) -> Result<(), ClientError> {
        let encoded = self.encode_emotes(text).await;
        self.send_command(
            PacketType::RoomChat,
            to_room_id(user_id.0) as i32,
            0,
            0,
            Some(&encoded),
        )
        .await
    }

    /// Sends a private message to a user.
    pub async fn send_pm(&self, user_id: UserId, text: &str) -> Result<(), ClientError> {
        let encoded = self.encode_emotes(text).await;
        self.send_command(PacketType::PrivateMessage, user_id.0 as i32, 0, 0, Some(&encoded))
            .await
    }

    /// Looks up a user by display name.
    ///
    /// Resolves with the user's session payload, or `None` when the
    /// server reports no such user (or the connection drops first).
    pub async fn lookup_user(&self, name: &str) -> Result<Option<Value>, ClientError> {
        let key = name.to_lowercase();
        let (tx, rx) = oneshot::channel();
        self.inner
            .lookups
            .lock()
            .expect("lookups lock")
            .entry(key)
            .or_default()
            .push(tx);

        self.send_command(PacketType::UserLookup, 0, 0, 0, Some(name))
            .await?;

        rx.await
            .map_err(|_| ClientError::Disconnected("lookup abandoned".into()))
    }

    // -- Emote helpers -----------------------------------------------------

    /// Encodes human-typed text for the wire. Never fails: a codec
    /// error falls back to the raw text.
    pub async fn encode_emotes(&self, text: &str) -> String {
        match self.emote_codec().await.encode(text).await {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "emote encode failed, sending raw text");
                text.to_string()
            }
        }
    }

    /// Decodes wire chat text for display. Never fails: a codec error
    /// falls back to the raw text.
    pub async fn decode_emotes(&self, text: &str) -> String {
        match self.emote_codec().await.decode(text).await {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "emote decode failed, showing raw text");
                text.to_string()
            }
        }
    }

    /// Whether the login handshake has completed on this connection.
    pub fn logged_in(&self) -> bool {
        self.inner.login_received.load(Ordering::SeqCst)
    }
}
