mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "lobby_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines on stdout instead of human-readable output.
    pub json: bool,
    /// Whether to persist warn+ logs to SQLite.
    pub log_to_sqlite: bool,
    /// Path to the log database.
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            log_to_sqlite: true,
            log_db_path: PathBuf::from(home).join(".lobby/database/logs.db"),
        }
    }
}

impl TelemetryConfig {
    /// Filter directives such as `info,lobby_engine=debug`.
    pub fn filter_directives(&self) -> String {
        std::iter::once(self.log_level.as_str().to_lowercase())
            .chain(
                self.module_levels
                    .iter()
                    .map(|(module, level)| format!("{module}={}", level.as_str().to_lowercase())),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.filter_directives()))
    }

    fn open_log_sink(&self) -> Option<Arc<SqliteLogSink>> {
        if !self.log_to_sqlite {
            return None;
        }
        match SqliteLogSink::new(&self.log_db_path) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                eprintln!("lobby-telemetry: log database unavailable ({e}), warnings will not be persisted");
                None
            }
        }
    }
}

/// Returned by [`init_telemetry`]; holds the persisted-log sink, if any.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    pub fn log_sink(&self) -> Option<Arc<SqliteLogSink>> {
        self.log_sink.clone()
    }
}

/// Install the global subscriber. Call once, at startup.
///
/// `RUST_LOG` wins over the configured levels when set.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let stdout = tracing_subscriber::fmt::layer().with_target(true);
    let stdout = if config.json {
        stdout.json().with_span_list(true).with_filter(config.env_filter()).boxed()
    } else {
        stdout.with_filter(config.env_filter()).boxed()
    };

    let log_sink = config.open_log_sink();
    let persisted = log_sink.clone().map(SqliteLogLayer::new);

    tracing_subscriber::registry().with(stdout).with(persisted).init();

    TelemetryGuard { log_sink }
}
