//! The emote codec seam.
//!
//! The platform's emote shortcuts are translated to and from their wire
//! encoding by code that, on the website, is fetched from the live site
//! itself. That is not portable, so the client only defines the seam:
//! an injectable [`EmoteCodec`] with a pass-through default. Integrators
//! that need real translation supply their own implementation.
//!
//! Codec failures are never fatal to a connection: callers log and use
//! the text unmodified.

use async_trait::async_trait;

/// An emote translation failure. Carries only a message; the caller's
/// recovery is always the same (pass the text through).
#[derive(Debug, thiserror::Error)]
#[error("emote codec: {0}")]
pub struct EmoteError(pub String);

/// Translates chat text between its human form and its wire encoding.
///
/// Both directions may hit the network, so both are async; neither may
/// be assumed cheap. The client initializes its codec lazily on first
/// use and shares one instance per client.
#[async_trait]
pub trait EmoteCodec: Send + Sync {
    /// Translates human-typed text (with emote shortcuts) to the wire
    /// encoding.
    async fn encode(&self, text: &str) -> Result<String, EmoteError>;

    /// Translates wire-encoded text back to display text.
    async fn decode(&self, text: &str) -> Result<String, EmoteError>;
}

/// The default codec: no translation at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

#[async_trait]
impl EmoteCodec for PassthroughCodec {
    async fn encode(&self, text: &str) -> Result<String, EmoteError> {
        Ok(text.to_string())
    }

    async fn decode(&self, text: &str) -> Result<String, EmoteError> {
        Ok(text.to_string())
    }
}
