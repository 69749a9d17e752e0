//! The process-wide entity registry.
//!
//! One registry serves every connection in the process: entities are
//! keyed by the platform's global id space, independent of which
//! connection observed them. The registry is not internally
//! synchronized: callers serialize access behind a single mutex or
//! confine all mutation to one task.

use std::collections::HashMap;

use serde_json::json;
use tracing::info;

use camlink_events::EventBus;
use camlink_protocol::{Packet, PacketType, Payload, SessionId, UserId, VideoState};

use crate::entity::Entity;
use crate::merge::merge;

/// Registry of every entity this process has ever observed.
///
/// Entities are created on first reference and never destroyed; a
/// registry-wide [`reset`](Self::reset) drives them Offline instead,
/// which is what happens when the last connection is lost (nothing can
/// be known about anyone's live state anymore).
#[derive(Default)]
pub struct EntityRegistry {
    entities: HashMap<UserId, Entity>,
    connected_clients: usize,
}

impl EntityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an entity without creating it.
    pub fn get(&self, id: UserId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Looks up an entity, creating an empty one on first reference.
    pub fn get_or_create(&mut self, id: UserId) -> &mut Entity {
        self.entities.entry(id).or_insert_with(|| Entity::new(id))
    }

    /// Finds an entity by display name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities
            .values()
            .find(|e| e.display_name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    /// All entities matching a predicate.
    pub fn filter<F>(&self, mut predicate: F) -> Vec<&Entity>
    where
        F: FnMut(&Entity) -> bool,
    {
        self.entities.values().filter(|e| predicate(e)).collect()
    }

    /// Every entity currently known that has a live (non-offline) best
    /// session.
    pub fn online(&self) -> Vec<&Entity> {
        self.filter(|e| !e.video_state().is_offline())
    }

    /// Iterates all known entities.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of known entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the registry has never seen an entity.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // -- Connection accounting --------------------------------------------

    /// Records a connection coming up. Returns the new count.
    pub fn client_connected(&mut self) -> usize {
        self.connected_clients += 1;
        self.connected_clients
    }

    /// Records a connection going away (floored at zero). When the last
    /// one is gone the registry resets: with no connection left, no
    /// live state can be trusted. Returns the new count.
    pub fn client_disconnected(&mut self, bus: &EventBus) -> usize {
        self.connected_clients = self.connected_clients.saturating_sub(1);
        if self.connected_clients == 0 {
            self.reset(bus);
        }
        self.connected_clients
    }

    /// Currently-connected client count.
    pub fn connected_clients(&self) -> usize {
        self.connected_clients
    }

    /// Drives every entity to Offline.
    ///
    /// Non-authoritative sessions are forced Offline directly (they
    /// were never observable, no events owed), then a synthetic Offline
    /// state is re-merged for the authoritative session so subscribers
    /// see the transition like any other state change.
    pub fn reset(&mut self, bus: &EventBus) {
        info!(entities = self.entities.len(), "resetting registry to offline");
        for entity in self.entities.values_mut() {
            let best = entity.best_session_id();
            if best == SessionId(0) {
                // Never had a live session; nothing to transition.
                continue;
            }
            let ids: Vec<SessionId> = entity.sessions().keys().copied().collect();
            for id in ids {
                if id != best {
                    if let Some(session) = entity.session_mut(id) {
                        session.set("vs", json!(VideoState::Offline.code()));
                    }
                }
            }
            let synthetic = Packet::new(
                PacketType::SessionState,
                0,
                0,
                0,
                entity.id().0 as i32,
                Payload::Json(json!({
                    "sid": best.0,
                    "vs": VideoState::Offline.code(),
                })),
            );
            // Always applicable for SessionState; never fails.
            let _ = merge(entity, &synthetic, bus);
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
