use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::schema;

/// Shared handle to the chat database. Clones share one connection and
/// calls through [`Database::with_conn`] run one at a time.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database file, creating it and its directory on first use.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::Io(format!("{}: {e}", dir.display())))?;
        }
        let db = Self::prepare(Connection::open(path)?)?;
        info!(path = %path.display(), "chat database ready");
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(schema::PRAGMAS)?;
        let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < schema::SCHEMA_VERSION {
            conn.execute_batch(schema::CREATE_TABLES)?;
            conn.pragma_update(None, "user_version", schema::SCHEMA_VERSION)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        f(&self.conn.lock())
    }

    /// Value of `PRAGMA user_version`.
    pub fn schema_version(&self) -> Result<u32, StoreError> {
        self.with_conn(|conn| Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(db: &Database, name: &str) -> bool {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get::<_, i64>(0),
            )?)
        })
        .unwrap()
            == 1
    }

    #[test]
    fn in_memory_gets_current_schema() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), schema::SCHEMA_VERSION);
        assert!(table_exists(&db, "chat_messages"));
    }

    #[test]
    fn reopening_a_file_keeps_rows() {
        let dir = std::env::temp_dir().join(format!("lobby-store-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("nested").join("chat.db");

        let first = Database::open(&path).unwrap();
        assert!(path.exists());
        first
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO chat_messages (id, lobby_id, sequence, username, content, timestamp)
                     VALUES ('m1', 'lobby-1', 1, 'a@example.com', 'hi', '2026-01-01T00:00:00Z')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        drop(first);

        let second = Database::open(&path).unwrap();
        assert_eq!(second.schema_version().unwrap(), schema::SCHEMA_VERSION);
        let rows: i64 = second
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM chat_messages", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(rows, 1);

        drop(second);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
