//! Error types for the model layer.

use camlink_protocol::{PacketType, UserId};

/// Errors that can occur while merging packets into the entity model.
///
/// These are invariant violations in the inbound data, not I/O
/// failures: the dispatch loop logs them and keeps the connection
/// alive.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A tags payload carried no entry for the entity it was routed to.
    /// The payload maps entity id to tag list, so a missing entry means
    /// the routing and the payload disagree.
    #[error("tags payload has no entry for entity {user_id}")]
    TagsMissingEntity {
        /// The entity the packet was routed to.
        user_id: UserId,
    },

    /// [`merge`](crate::merge) was handed a packet type that carries no
    /// session state.
    #[error("packet type {0} is not mergeable")]
    NotMergeable(PacketType),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_missing_entity_names_the_entity() {
        let err = ModelError::TagsMissingEntity { user_id: UserId(123) };
        assert!(err.to_string().contains("u123"));
    }

    #[test]
    fn test_not_mergeable_names_the_type() {
        let err = ModelError::NotMergeable(PacketType::Login);
        assert!(err.to_string().contains("Login"));
    }
}
