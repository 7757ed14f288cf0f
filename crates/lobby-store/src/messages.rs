use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use lobby_core::{LobbyId, MessageId};

use crate::database::Database;
use crate::error::StoreError;
use crate::gateway::PersistenceGateway;
use crate::row_helpers;

/// A persisted chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub lobby_id: LobbyId,
    pub sequence: i64,
    pub username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// SQLite-backed chat log.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Number of persisted messages for a lobby.
    #[instrument(skip(self), fields(lobby_id = %lobby_id))]
    pub fn count(&self, lobby_id: &LobbyId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE lobby_id = ?1",
                [lobby_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }
}

impl PersistenceGateway for MessageRepo {
    /// Sequence numbers are assigned under the connection lock, so appends
    /// for one lobby are totally ordered.
    #[instrument(skip(self, content), fields(lobby_id = %lobby_id, author))]
    fn append(
        &self,
        lobby_id: &LobbyId,
        author: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, StoreError> {
        self.db.with_conn(|conn| {
            let next_seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence), -1) + 1 FROM chat_messages WHERE lobby_id = ?1",
                [lobby_id.as_str()],
                |row| row.get(0),
            )?;

            let id = MessageId::new();
            conn.execute(
                "INSERT INTO chat_messages (id, lobby_id, sequence, username, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    lobby_id.as_str(),
                    next_seq,
                    author,
                    content,
                    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )?;
            Ok(id)
        })
    }

    #[instrument(skip(self), fields(lobby_id = %lobby_id))]
    fn list_all(&self, lobby_id: &LobbyId) -> Result<Vec<StoredMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, lobby_id, sequence, username, content, timestamp
                 FROM chat_messages WHERE lobby_id = ?1
                 ORDER BY sequence ASC",
            )?;
            let mut rows = stmt.query([lobby_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<StoredMessage, StoreError> {
    let raw_ts: String = row_helpers::get(row, 5, "chat_messages", "timestamp")?;
    Ok(StoredMessage {
        message_id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "chat_messages", "id")?),
        lobby_id: LobbyId::from_raw(row_helpers::get::<String>(row, 1, "chat_messages", "lobby_id")?),
        sequence: row_helpers::get(row, 2, "chat_messages", "sequence")?,
        username: row_helpers::get(row, 3, "chat_messages", "username")?,
        content: row_helpers::get(row, 4, "chat_messages", "content")?,
        timestamp: row_helpers::parse_timestamp(&raw_ts, "chat_messages", "timestamp")?,
    })
}
