//! Event fan-out for camlink.
//!
//! One [`EventBus`] serves the whole process: the merge engine publishes
//! property changes through it, the client publishes decoded packets and
//! lifecycle transitions, and external subscribers pick whichever view
//! they need:
//!
//! - property changes for one entity, or for every entity (global),
//! - decoded packets of one type, or all of them (catch-all),
//! - connection lifecycle transitions.
//!
//! Channels are `tokio::sync::broadcast`: publishing never blocks the
//! dispatch path, and a subscriber that falls behind observes a
//! `Lagged` error rather than slowing everyone else down. Publishing to
//! a channel nobody subscribed to is a silent no-op.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::broadcast;

use camlink_protocol::{Packet, PacketType, UserId};

/// Default per-channel buffer. Bursts above this lag the slowest
/// subscriber, never the publisher.
const DEFAULT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// One observed change of one session property of one entity.
///
/// `old == None` means the property did not exist before; `new == None`
/// means it was removed (a session handoff cleared it).
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    /// The entity whose state changed.
    pub user_id: UserId,
    /// Property name, e.g. `"vs"`, `"rank"`, `"true_private"`.
    pub property: String,
    /// Value before the merge, taken from the previously-best session.
    pub old: Option<Value>,
    /// Value after the merge, or `None` for a removal.
    pub new: Option<Value>,
}

/// Connection lifecycle transitions, published by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Transport established (before any login handshake).
    Connected,
    /// Connection lost or closed; `reason` is human-readable.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
    /// The server rejected the login handshake.
    LoginFailed {
        /// The nonzero reply code from the server.
        code: i32,
    },
    /// The initial roster listing reached its declared total.
    RosterLoaded,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Process-wide pub/sub hub. Cheap to share behind an `Arc`.
pub struct EventBus {
    capacity: usize,
    global: broadcast::Sender<PropertyChange>,
    entities: Mutex<HashMap<UserId, broadcast::Sender<PropertyChange>>>,
    packets: broadcast::Sender<Packet>,
    typed: Mutex<HashMap<PacketType, broadcast::Sender<Packet>>>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Creates a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus with an explicit per-channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (global, _) = broadcast::channel(capacity);
        let (packets, _) = broadcast::channel(capacity);
        let (lifecycle, _) = broadcast::channel(capacity);
        Self {
            capacity,
            global,
            entities: Mutex::new(HashMap::new()),
            packets,
            typed: Mutex::new(HashMap::new()),
            lifecycle,
        }
    }

    // -- Property changes --------------------------------------------------

    /// Publishes a property change: once on the entity's own channel
    /// (when anyone ever subscribed to it), once on the global channel.
    pub fn publish_change(&self, change: PropertyChange) {
        let entities = self.entities.lock().expect("entities lock");
        if let Some(sender) = entities.get(&change.user_id) {
            let _ = sender.send(change.clone());
        }
        drop(entities);
        let _ = self.global.send(change);
    }

    /// Subscribes to property changes of a single entity.
    pub fn subscribe_entity(&self, user_id: UserId) -> broadcast::Receiver<PropertyChange> {
        self.entities
            .lock()
            .expect("entities lock")
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribes to property changes of every entity.
    pub fn subscribe_global(&self) -> broadcast::Receiver<PropertyChange> {
        self.global.subscribe()
    }

    // -- Packets -----------------------------------------------------------

    /// Publishes a decoded packet to its per-type channel (if one was
    /// ever requested) and to the catch-all channel.
    pub fn publish_packet(&self, packet: &Packet) {
        let typed = self.typed.lock().expect("typed lock");
        if let Some(sender) = typed.get(&packet.packet_type) {
            let _ = sender.send(packet.clone());
        }
        drop(typed);
        let _ = self.packets.send(packet.clone());
    }

    /// Subscribes to packets of one type.
    pub fn subscribe_type(&self, packet_type: PacketType) -> broadcast::Receiver<Packet> {
        self.typed
            .lock()
            .expect("typed lock")
            .entry(packet_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribes to every decoded packet.
    pub fn subscribe_packets(&self) -> broadcast::Receiver<Packet> {
        self.packets.subscribe()
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Publishes a lifecycle transition.
    pub fn publish_lifecycle(&self, event: LifecycleEvent) {
        let _ = self.lifecycle.send(event);
    }

    /// Subscribes to lifecycle transitions.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use camlink_protocol::Payload;
    use serde_json::json;

    fn change(user: u32, property: &str, new: i64) -> PropertyChange {
        PropertyChange {
            user_id: UserId(user),
            property: property.to_string(),
            old: None,
            new: Some(json!(new)),
        }
    }

    #[tokio::test]
    async fn test_publish_change_reaches_entity_and_global() {
        let bus = EventBus::new();
        let mut entity_rx = bus.subscribe_entity(UserId(1));
        let mut global_rx = bus.subscribe_global();

        bus.publish_change(change(1, "vs", 90));

        assert_eq!(entity_rx.recv().await.unwrap().property, "vs");
        assert_eq!(global_rx.recv().await.unwrap().property, "vs");
    }

    #[tokio::test]
    async fn test_entity_channel_only_sees_its_own_entity() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe_entity(UserId(1));

        bus.publish_change(change(2, "vs", 90));
        bus.publish_change(change(1, "rank", 10));

        let got = rx1.recv().await.unwrap();
        assert_eq!(got.user_id, UserId(1));
        assert_eq!(got.property, "rank");
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_is_a_noop() {
        let bus = EventBus::new();
        // Nothing subscribed anywhere; must not panic or error.
        bus.publish_change(change(1, "vs", 90));
        bus.publish_lifecycle(LifecycleEvent::Connected);
    }

    #[tokio::test]
    async fn test_typed_packet_channel_filters_by_type() {
        let bus = EventBus::new();
        let mut chat_rx = bus.subscribe_type(PacketType::RoomChat);
        let mut all_rx = bus.subscribe_packets();

        let state = Packet::new(PacketType::SessionState, 0, 0, 0, 5, Payload::None);
        let chat = Packet::new(PacketType::RoomChat, 0, 1, 0, 0, Payload::None);
        bus.publish_packet(&state);
        bus.publish_packet(&chat);

        // The typed channel sees only chat; the catch-all sees both.
        assert_eq!(chat_rx.recv().await.unwrap().packet_type, PacketType::RoomChat);
        assert_eq!(all_rx.recv().await.unwrap().packet_type, PacketType::SessionState);
        assert_eq!(all_rx.recv().await.unwrap().packet_type, PacketType::RoomChat);
    }

    #[tokio::test]
    async fn test_lifecycle_events_arrive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_lifecycle();

        bus.publish_lifecycle(LifecycleEvent::Connected);
        bus.publish_lifecycle(LifecycleEvent::Disconnected {
            reason: "keepalive timeout".into(),
        });

        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Connected);
        assert!(matches!(
            rx.recv().await.unwrap(),
            LifecycleEvent::Disconnected { .. }
        ));
    }
}
