use chrono::{DateTime, Utc};
use lobby_core::{LobbyId, MessageId};

use crate::error::StoreError;
use crate::messages::StoredMessage;

/// Durable, per-lobby ordered log of chat messages.
///
/// Callers treat failures as non-fatal: a failed append is logged and the
/// message is still delivered.
pub trait PersistenceGateway: Send + Sync {
    fn append(
        &self,
        lobby_id: &LobbyId,
        author: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, StoreError>;

    /// Every persisted message for `lobby_id`, in append order.
    fn list_all(&self, lobby_id: &LobbyId) -> Result<Vec<StoredMessage>, StoreError>;
}
