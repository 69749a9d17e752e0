//! Transport abstraction layer for camlink.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract
//! over the two ways of reaching a chat server (raw TCP with binary
//! framing, or WebSocket with text framing), plus anything a test wants
//! to stand in for them.
//!
//! The transport decides more than just the socket type: it fixes which
//! frame encoding the connection speaks and how often the keepalive
//! must tick, because the liveness semantics of the two variants
//! differ.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

mod error;
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use tcp::{TcpConnection, TcpTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::future::Future;
use std::time::Duration;

use camlink_protocol::FramingKind;

// The async methods are declared as `impl Future + Send` (rather than
// plain `async fn`) so client code can hold them inside spawned tasks
// even when the transport is a generic parameter. Implementations
// still just write `async fn`.

/// Establishes outbound connections to chat servers.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Conn: Connection;

    /// Connects to the given server address.
    fn connect(
        &self,
        addr: &str,
    ) -> impl Future<Output = Result<Self::Conn, TransportError>> + Send;

    /// Which frame encoding connections of this transport speak.
    fn framing(&self) -> FramingKind;

    /// How often the keepalive must tick on this transport.
    fn keepalive_interval(&self) -> Duration;
}

/// A single established connection that can send and receive bytes.
pub trait Connection: Send + Sync + 'static {
    /// Sends data to the server.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next chunk from the server.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed. A
    /// chunk carries no frame alignment guarantee: it may hold a
    /// fraction of a frame or many frames.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection. Safe to call more than once.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
