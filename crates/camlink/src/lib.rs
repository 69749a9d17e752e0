//! # camlink
//!
//! Client library for a proprietary binary/WebSocket chat protocol used
//! by a live-streaming platform. A [`Client`] keeps a persistent
//! connection to one of a pool of interchangeable servers, decodes the
//! framed stream into typed packets, and projects them into a shared
//! in-memory registry of performer entities and their sessions.
//!
//! ```text
//! socket bytes → framing → Packet → dispatch ──→ EntityRegistry
//!                                       │              │
//!                                       └──────→ EventBus ──→ subscribers
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use camlink::ClientBuilder;
//! use camlink_transport::WebSocketTransport;
//!
//! # async fn run() -> Result<(), camlink::ClientError> {
//! let client = ClientBuilder::new().build(WebSocketTransport);
//! client.connect_and_wait_for_models().await?;
//!
//! let online = client.registry().lock().await.online().len();
//! println!("{online} performers online");
//! # Ok(())
//! # }
//! ```
//!
//! Lifecycle, state changes, and raw packets are all observable through
//! the [`EventBus`](camlink_events::EventBus) returned by
//! [`Client::bus`].

mod client;
mod commands;
mod config;
mod emote;
mod error;
mod handler;

pub use client::{Client, ClientBuilder, ClientState, GUEST_USERNAME};
pub use config::{
    parse_server_config, ConfigFetcher, HttpConfigFetcher, ServerConfig,
    StaticServers,
};
pub use emote::{EmoteCodec, EmoteError, PassthroughCodec};
pub use error::ClientError;

// Re-export the sub-crates' surfaces most integrators need.
pub use camlink_events as events;
pub use camlink_model as model;
pub use camlink_protocol as protocol;
pub use camlink_transport as transport;
