//! Per-session state: one record per observed connection of an entity.
//!
//! A session is an open-ended property bag with a handful of typed
//! mirrors on top. Every key received from the wire round-trips through
//! [`SessionRecord::get`]; the mirrors (`video_state`, `model_sw`, the
//! mute flags, rank, room occupancy) exist so the merge engine and
//! subscribers never re-parse JSON for the fields they test on every
//! packet.

use std::collections::HashMap;

use serde_json::Value;

use camlink_protocol::{SessionId, VideoState};

/// State of one session, owned by exactly one entity.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    session_id: SessionId,
    video_state: VideoState,
    model_sw: bool,
    true_private: bool,
    guests_muted: bool,
    basics_muted: bool,
    rank: Option<i64>,
    room_occupants: Option<i64>,
    display_name: Option<String>,
    properties: HashMap<String, Value>,
}

impl SessionRecord {
    /// Creates a fresh record in the Offline state.
    ///
    /// Offline is the required starting point: a session that never
    /// receives a video state must stay purge-eligible.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            video_state: VideoState::Offline,
            model_sw: false,
            true_private: false,
            guests_muted: false,
            basics_muted: false,
            rank: None,
            room_occupants: None,
            display_name: None,
            properties: HashMap::new(),
        }
    }

    /// This session's id.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Current broadcast state (`vs`).
    pub fn video_state(&self) -> VideoState {
        self.video_state
    }

    /// Whether this session is run by the platform's operator software.
    pub fn model_sw(&self) -> bool {
        self.model_sw
    }

    /// Whether private shows are un-spyable.
    pub fn true_private(&self) -> bool {
        self.true_private
    }

    /// Whether guests are muted in this room.
    pub fn guests_muted(&self) -> bool {
        self.guests_muted
    }

    /// Whether basic members are muted in this room.
    pub fn basics_muted(&self) -> bool {
        self.basics_muted
    }

    /// Camscore-style rank, when received.
    pub fn rank(&self) -> Option<i64> {
        self.rank
    }

    /// Room occupant count, when received.
    pub fn room_occupants(&self) -> Option<i64> {
        self.room_occupants
    }

    /// Display name as last seen on this session.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// A single received property by wire key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// The full property bag, known and unknown keys alike.
    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    /// Sets one property, updating the typed mirror for known keys.
    /// Returns the previous value of the key on THIS session (the merge
    /// engine diffs against the previous best session separately).
    pub fn set(&mut self, key: &str, value: Value) -> Option<Value> {
        self.mirror(key, &value);
        self.properties.insert(key.to_string(), value)
    }

    fn mirror(&mut self, key: &str, value: &Value) {
        match key {
            "vs" => {
                if let Some(code) = value.as_i64() {
                    self.video_state = VideoState::from_code(code as i32);
                }
            }
            "nm" => {
                if let Some(name) = value.as_str() {
                    self.display_name = Some(name.to_string());
                }
            }
            "rank" => self.rank = value.as_i64(),
            "rc" => self.room_occupants = value.as_i64(),
            "model_sw" => self.model_sw = value.as_bool().unwrap_or(false),
            "true_private" => self.true_private = value.as_bool().unwrap_or(false),
            "guests_muted" => self.guests_muted = value.as_bool().unwrap_or(false),
            "basics_muted" => self.basics_muted = value.as_bool().unwrap_or(false),
            _ => {}
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
