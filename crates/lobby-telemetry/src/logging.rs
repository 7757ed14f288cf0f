use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// One persisted WARN or ERROR event, as returned by [`SqliteLogSink::query`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Remaining event fields as a JSON object.
    pub fields: Option<String>,
    pub lobby_id: Option<String>,
    pub email: Option<String>,
}

/// Filters for [`SqliteLogSink::query`]. Unset filters match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub lobby_id: Option<String>,
    /// RFC 3339 lower bound, inclusive.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

const LOG_TABLE: &str = "
    PRAGMA journal_mode = WAL;
    CREATE TABLE IF NOT EXISTS logs (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level     TEXT NOT NULL,
        target    TEXT NOT NULL,
        message   TEXT NOT NULL,
        fields    TEXT,
        lobby_id  TEXT,
        email     TEXT
    );
    CREATE INDEX IF NOT EXISTS logs_by_lobby ON logs(lobby_id, id);
    CREATE INDEX IF NOT EXISTS logs_by_level ON logs(level, id);";

/// Queryable store of warnings and errors.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(dir) = db_path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(LOG_TABLE)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Write failures are dropped; logging must never fail the caller.
    fn insert(&self, entry: &LogInsert) {
        let _ = self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, lobby_id, email)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.timestamp,
                entry.level,
                entry.target,
                entry.message,
                entry.fields,
                entry.lobby_id,
                entry.email,
            ],
        );
    }

    /// Newest first. `level` matches case-insensitively, `target` by substring.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, level, target, message, fields, lobby_id, email FROM logs
             WHERE (?1 IS NULL OR level = UPPER(?1))
               AND (?2 IS NULL OR target LIKE '%' || ?2 || '%')
               AND (?3 IS NULL OR lobby_id = ?3)
               AND (?4 IS NULL OR timestamp >= ?4)
             ORDER BY id DESC
             LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![q.level, q.target, q.lobby_id, q.since, q.limit.unwrap_or(100)],
            |row| {
                Ok(LogRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    fields: row.get(5)?,
                    lobby_id: row.get(6)?,
                    email: row.get(7)?,
                })
            },
        )?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    lobby_id: Option<String>,
    email: Option<String>,
}

/// `tracing` layer that writes WARN and ERROR events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

/// Lobby correlation keys, pulled out of event or span fields.
#[derive(Clone, Default)]
struct Correlation {
    lobby_id: Option<String>,
    email: Option<String>,
}

impl Correlation {
    fn is_complete(&self) -> bool {
        self.lobby_id.is_some() && self.email.is_some()
    }

    fn fill_from(&mut self, other: &Correlation) {
        if self.lobby_id.is_none() {
            self.lobby_id.clone_from(&other.lobby_id);
        }
        if self.email.is_none() {
            self.email.clone_from(&other.email);
        }
    }
}

#[derive(Default)]
struct EventFields {
    message: Option<String>,
    correlation: Correlation,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl EventFields {
    fn put(&mut self, field: &Field, value: serde_json::Value) {
        match field.name() {
            "message" => self.message = Some(plain_text(&value)),
            "lobby_id" => self.correlation.lobby_id = Some(plain_text(&value)),
            "email" => self.correlation.email = Some(plain_text(&value)),
            name => {
                self.extra.insert(name.to_string(), value);
            }
        }
    }
}

fn plain_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim_matches('"').to_string(),
        other => other.to_string(),
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, serde_json::Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, serde_json::Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > tracing::Level::WARN {
            return;
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);

        if !fields.correlation.is_complete() {
            for span in ctx.event_scope(event).into_iter().flatten() {
                if let Some(inherited) = span.extensions().get::<Correlation>() {
                    fields.correlation.fill_from(inherited);
                }
            }
        }

        self.sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: metadata.level().as_str().to_string(),
            target: metadata.target().to_string(),
            message: fields.message.unwrap_or_default(),
            fields: (!fields.extra.is_empty())
                .then(|| serde_json::Value::Object(fields.extra).to_string()),
            lobby_id: fields.correlation.lobby_id,
            email: fields.correlation.email,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = EventFields::default();
        attrs.record(&mut fields);
        let correlation = fields.correlation;
        if correlation.lobby_id.is_none() && correlation.email.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(correlation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn entry(level: &str, message: &str, lobby_id: Option<&str>) -> LogInsert {
        LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.into(),
            target: "lobby_engine::coordinator".into(),
            message: message.into(),
            fields: None,
            lobby_id: lobby_id.map(String::from),
            email: None,
        }
    }

    fn captured(sink: &Arc<SqliteLogSink>, f: impl FnOnce()) -> Vec<LogRecord> {
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, f);
        sink.query(&LogQuery::default()).unwrap()
    }

    #[test]
    fn file_sink_creates_its_directory() {
        let dir = std::env::temp_dir().join(format!("lobby-logs-{}", uuid::Uuid::now_v7()));
        let sink = SqliteLogSink::new(&dir.join("nested").join("logs.db")).unwrap();
        sink.insert(&entry("WARN", "queue saturated", Some("lobby-1")));
        assert_eq!(sink.count().unwrap(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn filters_combine() {
        let sink = SqliteLogSink::in_memory().unwrap();
        sink.insert(&entry("WARN", "slow consumer", Some("lobby-a")));
        sink.insert(&entry("ERROR", "persist failed", Some("lobby-a")));
        sink.insert(&entry("ERROR", "persist failed", Some("lobby-b")));

        let errors = sink
            .query(&LogQuery { level: Some("error".into()), ..LogQuery::default() })
            .unwrap();
        assert_eq!(errors.len(), 2);

        let lobby_a_errors = sink
            .query(&LogQuery {
                level: Some("ERROR".into()),
                lobby_id: Some("lobby-a".into()),
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(lobby_a_errors.len(), 1);
        assert_eq!(lobby_a_errors[0].lobby_id.as_deref(), Some("lobby-a"));

        let by_target = sink
            .query(&LogQuery { target: Some("coordinator".into()), ..LogQuery::default() })
            .unwrap();
        assert_eq!(by_target.len(), 3);
    }

    #[test]
    fn newest_first_with_limit() {
        let sink = SqliteLogSink::in_memory().unwrap();
        for n in 1..=5 {
            sink.insert(&entry("WARN", &format!("eviction {n}"), None));
        }
        let page = sink.query(&LogQuery { limit: Some(2), ..LogQuery::default() }).unwrap();
        let messages: Vec<_> = page.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["eviction 5", "eviction 4"]);
    }

    #[test]
    fn layer_keeps_warnings_with_correlation() {
        let sink = Arc::new(SqliteLogSink::in_memory().unwrap());
        let records = captured(&sink, || {
            tracing::info!(lobby_id = "lobby-1", "member joined");
            tracing::warn!(lobby_id = "lobby-1", email = "a@example.com", dropped = 3u64, "evicted slow consumer");
        });

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.level, "WARN");
        assert_eq!(record.message, "evicted slow consumer");
        assert_eq!(record.lobby_id.as_deref(), Some("lobby-1"));
        assert_eq!(record.email.as_deref(), Some("a@example.com"));
        let extra: serde_json::Value = serde_json::from_str(record.fields.as_deref().unwrap()).unwrap();
        assert_eq!(extra["dropped"], 3);
    }

    #[test]
    fn layer_takes_missing_keys_from_enclosing_spans() {
        let sink = Arc::new(SqliteLogSink::in_memory().unwrap());
        let records = captured(&sink, || {
            let outer = tracing::info_span!("register", email = "b@example.com");
            let _outer = outer.enter();
            let inner = tracing::info_span!("broadcast", lobby_id = "lobby-span");
            let _inner = inner.enter();
            tracing::error!("persist failed");
        });

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lobby_id.as_deref(), Some("lobby-span"));
        assert_eq!(records[0].email.as_deref(), Some("b@example.com"));
        assert!(records[0].fields.is_none());
    }
}
