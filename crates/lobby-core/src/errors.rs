use crate::ids::LobbyId;

/// Error taxonomy for lobby admission, coordination and delivery.
///
/// None of these are process-fatal. `Full`/`Capacity` surface as structured
/// failure responses, `Persistence` is logged, and the queue variants are
/// treated as member departure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("lobby not found: {0}")]
    LobbyNotFound(LobbyId),

    #[error("member not found: {0}")]
    MemberNotFound(String),

    #[error("lobby {lobby_id} is full ({capacity} members)")]
    Full { lobby_id: LobbyId, capacity: usize },

    #[error("a chat session is already in progress")]
    Capacity,

    #[error("membership expired for {0}")]
    MembershipExpired(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("outbound queue saturated")]
    QueueSaturated,

    #[error("outbound queue closed")]
    QueueClosed,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("coordinator stopped")]
    CoordinatorClosed,
}

impl LobbyError {
    /// Whether this error means the consumer is gone and its queue must be evicted.
    pub fn is_eviction(&self) -> bool {
        matches!(self, Self::QueueSaturated | Self::QueueClosed)
    }

    /// Whether this error is an admission refusal (lobby or session full).
    pub fn is_admission_refusal(&self) -> bool {
        matches!(self, Self::Full { .. } | Self::Capacity | Self::MembershipExpired(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::LobbyNotFound(_) => "lobby_not_found",
            Self::MemberNotFound(_) => "member_not_found",
            Self::Full { .. } => "full",
            Self::Capacity => "capacity",
            Self::MembershipExpired(_) => "membership_expired",
            Self::Persistence(_) => "persistence",
            Self::QueueSaturated => "queue_saturated",
            Self::QueueClosed => "queue_closed",
            Self::InvalidMessage(_) => "invalid_message",
            Self::CoordinatorClosed => "coordinator_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_classification() {
        assert!(LobbyError::QueueSaturated.is_eviction());
        assert!(LobbyError::QueueClosed.is_eviction());
        assert!(!LobbyError::Capacity.is_eviction());
        assert!(!LobbyError::Persistence("disk".into()).is_eviction());
    }

    #[test]
    fn admission_refusals() {
        let full = LobbyError::Full {
            lobby_id: LobbyId::from_raw("lobby-1"),
            capacity: 2,
        };
        assert!(full.is_admission_refusal());
        assert!(LobbyError::Capacity.is_admission_refusal());
        assert!(!LobbyError::LobbyNotFound(LobbyId::from_raw("x")).is_admission_refusal());
    }

    #[test]
    fn display_includes_context() {
        let full = LobbyError::Full {
            lobby_id: LobbyId::from_raw("lobby-1"),
            capacity: 5,
        };
        assert_eq!(full.to_string(), "lobby lobby-1 is full (5 members)");
        assert_eq!(
            LobbyError::MemberNotFound("a@example.com".into()).to_string(),
            "member not found: a@example.com"
        );
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(LobbyError::Capacity.error_kind(), "capacity");
        assert_eq!(LobbyError::QueueSaturated.error_kind(), "queue_saturated");
        assert_eq!(LobbyError::CoordinatorClosed.error_kind(), "coordinator_closed");
    }
}
