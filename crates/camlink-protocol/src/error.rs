//! Error types for the protocol layer.
//!
//! Each crate in camlink defines its own error enum. A `ProtocolError`
//! always means the byte stream itself was bad, never that a payload
//! had an unexpected shape (unparseable payloads fall back to raw
//! strings and are not errors).

use crate::framing::MAGIC;

/// Errors that can occur while framing or un-framing the wire stream.
///
/// Note the asymmetry in severity: an *incomplete* frame is not an
/// error at all (decoding reports `None` and the caller waits for more
/// data), but a [`BadMagic`](Self::BadMagic) means the stream is
/// desynchronized and the connection carrying it cannot continue.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The first header integer did not match the protocol magic.
    ///
    /// After this, frame boundaries can no longer be located: the
    /// buffer must be discarded and the connection torn down.
    #[error("bad frame magic: expected {MAGIC}, got {found}")]
    BadMagic {
        /// The value actually read where the magic was expected.
        found: i32,
    },

    /// A header field held a value no valid frame can carry
    /// (e.g. a negative payload length).
    #[error("invalid frame header: {0}")]
    InvalidHeader(String),

    /// The text-variant length tag was not a decimal number.
    #[error("invalid frame length tag: {0:?}")]
    InvalidLengthTag(String),

    /// A text-variant frame body did not have the
    /// `type from to arg1 arg2` shape.
    #[error("malformed text frame: {0}")]
    MalformedFrame(String),
}
