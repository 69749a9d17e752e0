//! Entity state tracking for camlink.
//!
//! This crate owns the in-memory projection of the packet stream:
//!
//! 1. **Sessions** ([`SessionRecord`]) — one property bag per observed
//!    connection of a user, with typed mirrors for the hot fields.
//! 2. **Entities** ([`Entity`]) — a user and their concurrent sessions,
//!    with the best-session tie-break that decides which session is
//!    authoritative.
//! 3. **The registry** ([`EntityRegistry`]) — every entity the process
//!    has observed, created on first reference, reset to Offline when
//!    the last connection dies.
//! 4. **The merge engine** ([`merge`]) — applies one packet to one
//!    entity and publishes only-on-change property events.
//!
//! # How it fits in the stack
//!
//! ```text
//! Client (above)    ← special-cases packet types into merges
//!     ↕
//! Model (this crate) ← entity/session state, change detection
//!     ↕
//! Protocol (below)  ← provides Packet, UserId, VideoState
//! ```
//!
//! Nothing here is internally synchronized: all mutation is expected to
//! happen on one logical dispatch thread, or behind one mutex when
//! multiple connections share the registry.

mod entity;
mod error;
mod merge;
mod registry;
mod session;

pub use entity::Entity;
pub use error::ModelError;
pub use merge::{merge, MergeReport};
pub use registry::EntityRegistry;
pub use session::SessionRecord;
