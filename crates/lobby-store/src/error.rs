/// Failures from the chat message store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Database(String),

    #[error("io: {0}")]
    Io(String),

    /// A stored column could not be read back as its Rust type.
    #[error("unreadable {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<StoreError> for lobby_core::LobbyError {
    fn from(e: StoreError) -> Self {
        Self::Persistence(e.to_string())
    }
}
