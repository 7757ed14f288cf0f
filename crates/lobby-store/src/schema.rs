/// Stored in `PRAGMA user_version` once the tables exist.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS chat_messages (
    id TEXT PRIMARY KEY,
    lobby_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    username TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (lobby_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_lobby_seq ON chat_messages(lobby_id, sequence);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
