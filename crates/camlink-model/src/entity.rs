//! A tracked platform user and their concurrent sessions.

use std::borrow::Cow;
use std::collections::BTreeMap;

use camlink_protocol::{SessionId, UserId, VideoState};

use crate::session::SessionRecord;

/// One platform user, tracked whether or not they are a performer.
///
/// An entity can legitimately have several live sessions at once: a
/// performer may run the operator software and a manual client side by
/// side. Exactly one of those sessions is authoritative at any moment;
/// [`best_session_id`](Self::best_session_id) selects it.
#[derive(Debug, Clone)]
pub struct Entity {
    id: UserId,
    display_name: Option<String>,
    tags: Vec<String>,
    sessions: BTreeMap<SessionId, SessionRecord>,
}

impl Entity {
    /// Creates an entity with no sessions and no tags.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            display_name: None,
            tags: Vec::new(),
            sessions: BTreeMap::new(),
        }
    }

    /// The entity's stable platform id.
    pub fn id(&self) -> UserId {
        self.id
    }

    /// Display name, as last seen on the authoritative session.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub(crate) fn set_display_name(&mut self, name: String) {
        self.display_name = Some(name);
    }

    /// The tag list. Append-only by protocol contract: the servers
    /// re-announce tags and the list is never deduplicated.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub(crate) fn extend_tags(&mut self, tags: impl IntoIterator<Item = String>) {
        self.tags.extend(tags);
    }

    /// All live session records, keyed by session id.
    pub fn sessions(&self) -> &BTreeMap<SessionId, SessionRecord> {
        &self.sessions
    }

    /// The session for `id`, creating it in the Offline state if new.
    pub(crate) fn ensure_session(&mut self, id: SessionId) -> &mut SessionRecord {
        self.sessions
            .entry(id)
            .or_insert_with(|| SessionRecord::new(id))
    }

    pub(crate) fn session_mut(&mut self, id: SessionId) -> Option<&mut SessionRecord> {
        self.sessions.get_mut(&id)
    }

    /// Drops sessions not matching the predicate, returning the ids
    /// removed.
    pub(crate) fn retain_sessions<F>(&mut self, mut keep: F) -> Vec<SessionId>
    where
        F: FnMut(&SessionRecord) -> bool,
    {
        let mut removed = Vec::new();
        self.sessions.retain(|id, record| {
            if keep(record) {
                true
            } else {
                removed.push(*id);
                false
            }
        });
        removed
    }

    /// Selects the authoritative session id, or `SessionId(0)` when the
    /// entity has no live session.
    ///
    /// Tie-break, in order: Offline sessions never qualify; a session
    /// running the operator software outranks any that is not; among
    /// equals, the numerically highest session id wins (ids are unique,
    /// so real ties cannot occur). This ordering is a behavioral
    /// contract observed from the live servers, not documented by them.
    pub fn best_session_id(&self) -> SessionId {
        let mut best = SessionId(0);
        let mut best_key = (false, 0u32);
        for (id, record) in &self.sessions {
            if record.video_state().is_offline() {
                continue;
            }
            let key = (record.model_sw(), id.0);
            if key > best_key {
                best_key = key;
                best = *id;
            }
        }
        best
    }

    /// The authoritative session, or a synthetic Offline record of id 0
    /// when the entity has none.
    pub fn best_session(&self) -> Cow<'_, SessionRecord> {
        match self.sessions.get(&self.best_session_id()) {
            Some(record) => Cow::Borrowed(record),
            None => Cow::Owned(SessionRecord::new(SessionId(0))),
        }
    }

    /// The entity's effective broadcast state: its best session's.
    pub fn video_state(&self) -> VideoState {
        self.best_session().video_state()
    }
}

// =========================================================================
// Tests
// =========================================================================
