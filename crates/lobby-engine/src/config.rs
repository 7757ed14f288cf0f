//! Lobby sizing and membership policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How long an inactive member keeps the right to rejoin their lobby.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MemberRetention {
    /// Inactive members may rejoin indefinitely.
    #[default]
    Forever,
    /// Members inactive for longer than `after_secs` are no longer matched for
    /// reconnection. Their rows are kept, so capacity accounting is unchanged.
    Expire { after_secs: u64 },
}

impl MemberRetention {
    /// Whether a member last seen at `last_seen` may still rejoin at `now`.
    pub fn allows_rejoin(&self, last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Forever => true,
            Self::Expire { after_secs } => {
                let idle = now.signed_duration_since(last_seen);
                idle.num_seconds() < i64::try_from(*after_secs).unwrap_or(i64::MAX)
            }
        }
    }
}

/// Configuration for lobbies and their connections.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    /// Members per lobby.
    pub capacity: usize,
    /// Pending outbound items per connection before it is evicted.
    pub queue_capacity: usize,
    /// Coordinator request channel size; submitters wait when it is full.
    pub request_buffer: usize,
    /// Seconds between heartbeat pings on each connection.
    pub heartbeat_interval_secs: u64,
    pub member_retention: MemberRetention,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            queue_capacity: 256,
            request_buffer: 1024,
            heartbeat_interval_secs: 30,
            member_retention: MemberRetention::Forever,
        }
    }
}

impl LobbyConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = LobbyConfig::default();
        assert_eq!(cfg.capacity, 5);
        assert_eq!(cfg.queue_capacity, 256);
        assert_eq!(cfg.member_retention, MemberRetention::Forever);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: LobbyConfig = serde_json::from_str(r#"{"capacity": 2}"#).unwrap();
        assert_eq!(cfg.capacity, 2);
        assert_eq!(cfg.queue_capacity, 256);
    }

    #[test]
    fn retention_serde_shape() {
        let json = serde_json::to_value(MemberRetention::Expire { after_secs: 60 }).unwrap();
        assert_eq!(json["policy"], "expire");
        assert_eq!(json["after_secs"], 60);

        let parsed: MemberRetention = serde_json::from_str(r#"{"policy":"forever"}"#).unwrap();
        assert_eq!(parsed, MemberRetention::Forever);
    }

    #[test]
    fn forever_always_allows_rejoin() {
        let long_ago = DateTime::parse_from_rfc3339("2000-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(MemberRetention::Forever.allows_rejoin(long_ago, Utc::now()));
    }

    #[test]
    fn expire_window() {
        let now = Utc::now();
        let policy = MemberRetention::Expire { after_secs: 60 };
        assert!(policy.allows_rejoin(now - chrono::Duration::seconds(59), now));
        assert!(!policy.allows_rejoin(now - chrono::Duration::seconds(61), now));
    }

    #[test]
    fn huge_expiry_window_never_expires() {
        let now = Utc::now();
        let long_ago = now - chrono::Duration::days(365 * 50);
        let policy = MemberRetention::Expire { after_secs: u64::MAX };
        assert!(policy.allows_rejoin(long_ago, now));
        let just_past_i64 = MemberRetention::Expire { after_secs: i64::MAX as u64 + 1 };
        assert!(just_past_i64.allows_rejoin(long_ago, now));
    }
}
