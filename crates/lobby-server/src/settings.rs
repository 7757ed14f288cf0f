//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LobbySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `LOBBY_*` environment overrides
//!
//! Command-line flags are applied last, by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn, Level};

use lobby_engine::LobbyConfig;
use lobby_telemetry::TelemetryConfig;

use crate::errors::SettingsError;

/// Root directory for lobby state (`~/.lobby`).
pub fn lobby_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".lobby")
}

/// Default settings file (`~/.lobby/settings.json`).
pub fn settings_path() -> PathBuf {
    lobby_home().join("settings.json")
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbySettings {
    pub server: ServerSettings,
    pub lobby: LobbyConfig,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Directory served at `/` for the browser client.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: lobby_home().join("database").join("lobby.db"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Keep WARN and above in a queryable SQLite log.
    pub persist_warnings: bool,
    pub log_db_path: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            persist_warnings: true,
            log_db_path: lobby_home().join("database").join("logs.db"),
        }
    }
}

impl LoggingSettings {
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.level.parse().unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            json: self.json,
            log_to_sqlite: self.persist_warnings,
            log_db_path: self.log_db_path.clone(),
        }
    }
}

impl LobbySettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.lobby.capacity == 0 {
            return Err(SettingsError::InvalidValue("lobby.capacity must be at least 1".into()));
        }
        if self.lobby.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue("lobby.queue_capacity must be at least 1".into()));
        }
        if self.lobby.request_buffer == 0 {
            return Err(SettingsError::InvalidValue("lobby.request_buffer must be at least 1".into()));
        }
        Ok(())
    }
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<LobbySettings, SettingsError> {
    let defaults = serde_json::to_value(LobbySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: LobbySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `LOBBY_*` environment overrides.
pub fn apply_env_overrides(settings: &mut LobbySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are logged and ignored.
pub fn apply_overrides(settings: &mut LobbySettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("LOBBY_HOST") {
        settings.server.host = v;
    }
    if let Some(raw) = read("LOBBY_PORT") {
        match parse_u16_range(&raw, 1, 65535) {
            Some(v) => settings.server.port = v,
            None => warn!(key = "LOBBY_PORT", value = %raw, "invalid env var, ignoring"),
        }
    }
    if let Some(raw) = read("LOBBY_CAPACITY") {
        match parse_usize_range(&raw, 1, 10_000) {
            Some(v) => settings.lobby.capacity = v,
            None => warn!(key = "LOBBY_CAPACITY", value = %raw, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("LOBBY_DB_PATH") {
        settings.storage.database_path = PathBuf::from(v);
    }
    if let Some(v) = read("LOBBY_STATIC_DIR") {
        settings.server.static_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = read("LOBBY_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use lobby_engine::MemberRetention;
    use serde_json::json;

    fn temp_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("lobby-settings-{}.json", uuid::Uuid::now_v7()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults() {
        let s = LobbySettings::default();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.lobby.capacity, 5);
        assert!(s.logging.persist_warnings);
        assert!(s.storage.database_path.ends_with("database/lobby.db"));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn deep_merge_objects_recursively() {
        let target = json!({"server": {"host": "0.0.0.0", "port": 8080}, "lobby": {"capacity": 5}});
        let source = json!({"server": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["lobby"]["capacity"], 5);
    }

    #[test]
    fn deep_merge_skips_nulls_and_replaces_arrays() {
        let merged = deep_merge(json!({"a": 1, "b": [1, 2]}), json!({"a": null, "b": [3]}));
        assert_eq!(merged, json!({"a": 1, "b": [3]}));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("lobby-settings-does-not-exist.json");
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.lobby.queue_capacity, 256);
    }

    #[test]
    fn file_values_override_defaults() {
        let path = temp_file(
            r#"{"lobby": {"capacity": 2, "member_retention": {"policy": "expire", "after_secs": 600}},
                "logging": {"json": true}}"#,
        );
        let s = load_settings_from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(s.lobby.capacity, 2);
        assert_eq!(s.lobby.heartbeat_interval_secs, 30);
        assert_eq!(s.lobby.member_retention, MemberRetention::Expire { after_secs: 600 });
        assert!(s.logging.json);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let path = temp_file("{not json");
        let result = load_settings_from_path(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(SettingsError::Json(_))));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let path = temp_file(r#"{"lobby": {"capacity": 0}}"#);
        let result = load_settings_from_path(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn overrides_apply_valid_values() {
        let env: HashMap<&str, &str> = [
            ("LOBBY_HOST", "127.0.0.1"),
            ("LOBBY_PORT", "9191"),
            ("LOBBY_CAPACITY", "3"),
            ("LOBBY_DB_PATH", "/var/lib/lobby/chat.db"),
        ]
        .into_iter()
        .collect();
        let mut s = LobbySettings::default();
        apply_overrides(&mut s, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.port, 9191);
        assert_eq!(s.lobby.capacity, 3);
        assert_eq!(s.storage.database_path, PathBuf::from("/var/lib/lobby/chat.db"));
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let env: HashMap<&str, &str> = [("LOBBY_PORT", "http"), ("LOBBY_CAPACITY", "0"), ("LOBBY_HOST", "")]
            .into_iter()
            .collect();
        let mut s = LobbySettings::default();
        apply_overrides(&mut s, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(s.server.port, 8080);
        assert_eq!(s.lobby.capacity, 5);
        assert_eq!(s.server.host, "0.0.0.0");
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_usize_range(" 7 ", 1, 10), Some(7));
        assert_eq!(parse_usize_range("11", 1, 10), None);
    }

    #[test]
    fn telemetry_config_from_logging() {
        let logging = LoggingSettings {
            level: "debug".into(),
            json: true,
            persist_warnings: false,
            log_db_path: PathBuf::from("/tmp/logs.db"),
        };
        let cfg = logging.telemetry_config();
        assert_eq!(cfg.log_level, Level::DEBUG);
        assert!(cfg.json);
        assert!(!cfg.log_to_sqlite);

        let bad = LoggingSettings {
            level: "loud".into(),
            ..LoggingSettings::default()
        };
        assert_eq!(bad.telemetry_config().log_level, Level::INFO);
    }
}
