//! Inbound packet handling: the special cases between the wire and the
//! entity model.
//!
//! Every decoded packet flows through [`Client::handle_packet`] in
//! arrival order. A subset of types gets special handling (login
//! replies, state merges, roster accounting, lookup replies); after
//! that, every packet, special-cased or not, is published on the bus
//! for subscribers.

use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::{debug, info, warn};

use camlink_events::LifecycleEvent;
use camlink_model::merge;
use camlink_protocol::{Packet, PacketType, Payload, UserId};
use camlink_transport::{Connection, Transport};

use crate::client::{Client, ClientState};

impl<T: Transport> Client<T> {
    /// Dispatches one decoded packet.
    pub(crate) async fn handle_packet(&self, packet: &Packet) {
        match packet.packet_type {
            PacketType::Login => self.handle_login(packet).await,
            PacketType::SessionState
            | PacketType::Detail
            | PacketType::Status
            | PacketType::Tags => self.merge_about_entity(packet).await,
            PacketType::ListBatch => self.handle_list_batch(packet).await,
            PacketType::Metrics => self.handle_metrics(packet),
            PacketType::UserLookup => self.handle_user_lookup(packet),
            _ => {}
        }
        self.inner.bus.publish_packet(packet);
    }

    // -- Login -------------------------------------------------------------

    /// Handles the server's login reply: `arg1 == 0` is success with
    /// the assigned display name in the payload and the session id in
    /// `to`; anything else is fatal for this connect attempt.
    async fn handle_login(&self, packet: &Packet) {
        if packet.arg1 != 0 {
            warn!(code = packet.arg1, "login rejected");
            self.inner
                .bus
                .publish_lifecycle(LifecycleEvent::LoginFailed { code: packet.arg1 });
            // The stream is useless without a login; tear down and let
            // the reconnect policy take it from there.
            let conn = self.inner.conn.lock().expect("conn lock").clone();
            if let Some(conn) = conn {
                let _ = conn.close().await;
            }
            return;
        }

        let assigned_name = match &packet.payload {
            Payload::Text(name) => Some(name.clone()),
            Payload::Json(Value::String(name)) => Some(name.clone()),
            _ => None,
        };
        self.inner
            .assigned_session
            .store(packet.to.max(0) as u32, Ordering::SeqCst);
        self.inner.login_received.store(true, Ordering::SeqCst);

        if let Some(name) = assigned_name {
            // A guest login gets its identity from the server.
            self.adopt_assigned_name(&name);
            info!(user = %name, session = packet.to, "logged in");
        } else {
            info!(session = packet.to, "logged in");
        }

        // A completed login proves the server likes us again: the
        // reconnect backoff starts over.
        self.inner.backoff.lock().expect("backoff lock").reset();
        self.inner.state.send_replace(ClientState::Ready);
    }

    // -- Entity merges -----------------------------------------------------

    /// Merges a packet into the entity it is about, creating the entity
    /// on first reference. Merge invariant violations are logged, never
    /// fatal to the connection.
    async fn merge_about_entity(&self, packet: &Packet) {
        let Some(user_id) = packet.about_user_id() else {
            debug!(%packet, "mergeable packet without an entity, ignoring");
            return;
        };
        let mut registry = self.inner.registry.lock().await;
        let entity = registry.get_or_create(user_id);
        if let Err(e) = merge(entity, packet, &self.inner.bus) {
            warn!(%user_id, error = %e, "merge rejected");
        }
    }

    // -- Initial roster ----------------------------------------------------

    /// One batch of the initial roster: an array of session-state
    /// payloads, each merged like a standalone session-state packet.
    async fn handle_list_batch(&self, packet: &Packet) {
        let Some(entries) = packet.payload.as_json().and_then(Value::as_array) else {
            return;
        };

        let mut merged = 0u32;
        {
            let mut registry = self.inner.registry.lock().await;
            for entry in entries {
                let Some(uid) = entry
                    .get("uid")
                    .and_then(Value::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
                else {
                    continue;
                };
                let synthetic = Packet::new(
                    PacketType::SessionState,
                    0,
                    0,
                    0,
                    uid as i32,
                    Payload::Json(entry.clone()),
                );
                let entity = registry.get_or_create(UserId::from_raw(uid));
                if let Err(e) = merge(entity, &synthetic, &self.inner.bus) {
                    warn!(uid, error = %e, "roster entry merge rejected");
                }
                merged += 1;
            }
        }

        let fire = {
            let mut roster = self.inner.roster.lock().expect("roster lock");
            roster.seen += merged;
            !roster.fired
                && roster.total.is_some_and(|total| roster.seen >= total)
                && {
                    roster.fired = true;
                    true
                }
        };
        if fire {
            self.roster_loaded();
        }
    }

    /// Roster progress report: `arg1` entries loaded of `arg2` total.
    fn handle_metrics(&self, packet: &Packet) {
        let fire = {
            let mut roster = self.inner.roster.lock().expect("roster lock");
            if packet.arg2 > 0 {
                roster.total = Some(packet.arg2 as u32);
            }
            roster.seen = roster.seen.max(packet.arg1.max(0) as u32);
            !roster.fired
                && roster.total.is_some_and(|total| roster.seen >= total)
                && {
                    roster.fired = true;
                    true
                }
        };
        if fire {
            self.roster_loaded();
        }
    }

    fn roster_loaded(&self) {
        info!("initial roster fully loaded");
        self.inner.bus.publish_lifecycle(LifecycleEvent::RosterLoaded);
    }

    // -- User lookup replies -----------------------------------------------

    /// Resolves pending lookups. A found user arrives as a JSON object
    /// whose `nm` names the query; a miss echoes the queried name as a
    /// plain-text payload.
    fn handle_user_lookup(&self, packet: &Packet) {
        let (key, result) = match &packet.payload {
            Payload::Json(value) => {
                let Some(name) = value.get("nm").and_then(Value::as_str) else {
                    return;
                };
                (name.to_lowercase(), Some(value.clone()))
            }
            Payload::Text(name) => (name.to_lowercase(), None),
            Payload::None => return,
        };

        let waiters = self
            .inner
            .lookups
            .lock()
            .expect("lookups lock")
            .remove(&key);
        if let Some(waiters) = waiters {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        } else {
            debug!(%key, "unsolicited user lookup reply");
        }
    }
}
