//! The state-merge engine: applying one packet to one entity.
//!
//! This is where most of the protocol's subtlety lives. A merge must
//! decide which of the entity's sessions the packet concerns, apply the
//! payload to it, work out which properties *observably* changed (from
//! the point of view of a subscriber watching the authoritative
//! session), and clean up sessions that stopped mattering.
//!
//! The observable-change rule: old values are read from a snapshot of
//! the session that was best BEFORE the mutation. When the mutated
//! session differs from that previous best, the merge also synthesizes
//! removal events for properties the old session had and the new one
//! does not: a session handoff must clear stale state for subscribers,
//! not leak it.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use camlink_events::{EventBus, PropertyChange};
use camlink_protocol::{flags, AccessLevel, Packet, PacketType, SessionId};

use crate::entity::Entity;
use crate::error::ModelError;

/// What one merge did, for callers that want to observe it (tests, the
/// dispatch loop's trace logging).
#[derive(Debug, Default)]
pub struct MergeReport {
    /// The session the payload was applied to (0 for a skipped merge).
    pub session_id: SessionId,
    /// Change events published (empty when the mutated session was not
    /// authoritative, or nothing changed).
    pub emitted: Vec<PropertyChange>,
    /// Sessions purged at the end of the merge.
    pub purged: Vec<SessionId>,
    /// The payload declared a non-model user level and was skipped.
    pub skipped_wrong_level: bool,
}

/// Merges one packet into one entity, publishing change events on the
/// bus when the affected session is (or becomes) authoritative.
///
/// Mergeable types: `SessionState`, `Detail`, `Status` (session-scoped
/// payloads) and `Tags` (entity-scoped). Anything else is a caller bug
/// and returns [`ModelError::NotMergeable`].
///
/// # Errors
///
/// [`ModelError::TagsMissingEntity`] when a tags payload carries no
/// entry for this entity. A payload declaring a user level other than
/// model is NOT an error: it is skipped without mutation or events
/// (recorded in the report), since the stream routinely describes
/// non-performer sessions this model does not track.
pub fn merge(
    entity: &mut Entity,
    packet: &Packet,
    bus: &EventBus,
) -> Result<MergeReport, ModelError> {
    match packet.packet_type {
        PacketType::Tags => merge_tags(entity, packet, bus),
        PacketType::SessionState | PacketType::Detail | PacketType::Status => {
            merge_session_payload(entity, packet, bus)
        }
        other => Err(ModelError::NotMergeable(other)),
    }
}

// ---------------------------------------------------------------------------
// Session-scoped payloads
// ---------------------------------------------------------------------------

fn merge_session_payload(
    entity: &mut Entity,
    packet: &Packet,
    bus: &EventBus,
) -> Result<MergeReport, ModelError> {
    let mut report = MergeReport::default();

    // Non-object payloads carry nothing to merge; treat as empty.
    let empty = Map::new();
    let payload = packet
        .payload
        .as_json()
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    // Model-only path: a payload describing a non-model session is
    // skipped outright. See DESIGN.md for the policy decision.
    if let Some(lv) = payload.get("lv").and_then(Value::as_i64) {
        if AccessLevel::from_code(lv) != Some(AccessLevel::Model) {
            warn!(entity = %entity.id(), level = lv, "skipping non-model merge payload");
            report.skipped_wrong_level = true;
            return Ok(report);
        }
    }

    // Step 1: which session does this payload concern?
    let sid = SessionId(
        payload
            .get("sid")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0),
    );
    report.session_id = sid;

    // Snapshot the previously-authoritative session before mutating
    // anything; all old values in change events come from it.
    let previous_best_id = entity.best_session_id();
    let previous_best: Map<String, Value> = entity
        .sessions()
        .get(&previous_best_id)
        .map(|s| {
            s.properties()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    // Steps 2 and 3: ensure the session exists and apply the payload,
    // flattening the u/m/s detail groups and deriving flag booleans.
    let entity_id = entity.id();
    let session = entity.ensure_session(sid);
    let mut pending: Vec<(String, Value)> = Vec::new();
    for (key, value) in payload {
        match key.as_str() {
            "u" | "m" | "s" => {
                if let Some(group) = value.as_object() {
                    for (inner_key, inner_value) in group {
                        pending.push((inner_key.clone(), inner_value.clone()));
                        if key == "m" && inner_key == "flags" {
                            let bits = inner_value.as_i64().unwrap_or(0);
                            for (name, bit) in [
                                ("true_private", flags::TRUE_PRIVATE),
                                ("guests_muted", flags::GUESTS_MUTED),
                                ("basics_muted", flags::BASICS_MUTED),
                                ("model_sw", flags::MODEL_SW),
                            ] {
                                pending.push((name.to_string(), Value::Bool(bits & bit != 0)));
                            }
                        }
                    }
                } else {
                    pending.push((key.clone(), value.clone()));
                }
            }
            _ => pending.push((key.clone(), value.clone())),
        }
    }

    // Step 4: apply, diffing against the previous-best snapshot.
    let mut changes: Vec<PropertyChange> = Vec::new();
    for (key, value) in pending {
        let old = previous_best.get(&key).cloned();
        let changed = old.as_ref() != Some(&value);
        session.set(&key, value.clone());
        if changed {
            changes.push(PropertyChange {
                user_id: entity_id,
                property: key,
                old,
                new: Some(value),
            });
        }
    }

    // Session handoff: properties present on the old authoritative
    // session but absent on the new one are observably removed.
    if sid != previous_best_id {
        let session = entity
            .sessions()
            .get(&sid)
            .expect("session ensured above");
        for (key, old_value) in &previous_best {
            if session.get(key).is_none() {
                changes.push(PropertyChange {
                    user_id: entity.id(),
                    property: key.clone(),
                    old: Some(old_value.clone()),
                    new: None,
                });
            }
        }
    }

    // Step 5: emit only when the change is observable on the
    // authoritative session: the mutated session is (or became) the
    // best one, or there is no best one at all anymore (the entity just
    // went fully offline, which subscribers must see), or the entity
    // had no live session before this merge.
    let new_best_id = entity.best_session_id();
    let emit = sid == new_best_id
        || (new_best_id == SessionId(0) && sid != SessionId(0))
        || (previous_best_id == SessionId(0) && sid != SessionId(0));
    if emit {
        if let Some(name) = entity
            .sessions()
            .get(&sid)
            .and_then(|s| s.display_name().map(str::to_string))
        {
            entity.set_display_name(name);
        }
        for change in &changes {
            bus.publish_change(change.clone());
        }
        report.emitted = changes;
    } else {
        debug!(
            entity = %entity.id(),
            session = %sid,
            best = %new_best_id,
            suppressed = changes.len(),
            "merge on non-authoritative session, events suppressed"
        );
    }

    // Step 6: purge sessions that are offline and not authoritative.
    report.purged = purge(entity, new_best_id);

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

fn merge_tags(
    entity: &mut Entity,
    packet: &Packet,
    bus: &EventBus,
) -> Result<MergeReport, ModelError> {
    let mut report = MergeReport {
        // Tags are not session-scoped: they attach to whichever session
        // is currently authoritative.
        session_id: entity.best_session_id(),
        ..MergeReport::default()
    };

    let entry = packet
        .payload
        .as_json()
        .and_then(Value::as_object)
        .and_then(|obj| obj.get(&entity.id().0.to_string()))
        .and_then(Value::as_array)
        .ok_or(ModelError::TagsMissingEntity { user_id: entity.id() })?;

    let old = Value::from(entity.tags().to_vec());
    let added: Vec<String> = entry
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    entity.extend_tags(added);
    let new = Value::from(entity.tags().to_vec());

    let change = PropertyChange {
        user_id: entity.id(),
        property: "tags".to_string(),
        old: Some(old),
        new: Some(new),
    };
    bus.publish_change(change.clone());
    report.emitted.push(change);

    Ok(report)
}

// ---------------------------------------------------------------------------
// Purge
// ---------------------------------------------------------------------------

/// Removes every offline session except the authoritative one. The
/// authoritative session is never purged, even when offline.
fn purge(entity: &mut Entity, best: SessionId) -> Vec<SessionId> {
    let purged = entity
        .retain_sessions(|s| s.session_id() == best || !s.video_state().is_offline());
    if !purged.is_empty() {
        debug!(entity = %entity.id(), count = purged.len(), "purged offline sessions");
    }
    purged
}
