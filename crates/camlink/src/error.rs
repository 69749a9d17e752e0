//! Unified error type for the camlink client.

use camlink_protocol::ProtocolError;
use camlink_transport::TransportError;

/// Top-level error for client operations.
///
/// Sub-crate errors are wrapped transparently, so the `?` operator
/// converts them automatically. Everything else a connect or command
/// can fail with gets its own variant.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A framing error. [`ProtocolError::BadMagic`] means the stream
    /// was unrecoverable and the connection was torn down.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server rejected the login handshake with a nonzero code.
    #[error("login failed with code {0}")]
    LoginFailed(i32),

    /// A command needed an established connection and there is none.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while a connection is already up.
    #[error("already connected")]
    AlreadyConnected,

    /// The connection was lost while an operation waited on it.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The server-pool configuration could not be fetched or parsed.
    /// Scoped to the operation that needed it; never tears down an
    /// established connection.
    #[error("server config: {0}")]
    Config(String),
}
