use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timestamp_success() {
        let ts = parse_timestamp("2026-02-14T12:00:00+02:00", "chat_messages", "timestamp").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-02-14T10:00:00+00:00");
    }

    #[test]
    fn parse_timestamp_failure() {
        let result = parse_timestamp("yesterday", "chat_messages", "timestamp");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "chat_messages", column: "timestamp", .. })
        ));
    }
}
