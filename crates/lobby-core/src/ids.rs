use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a string id newtype whose fresh values look like `<prefix>-<uuid v7>`.
///
/// Fresh ids sort in creation order.
macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "-{}"), Uuid::now_v7()))
            }

            /// Wrap an id received from a client or read from storage.
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

prefixed_id!(
    /// One chat room.
    LobbyId => "lobby"
);
prefixed_id!(
    /// A persisted chat message.
    MessageId => "msg"
);
prefixed_id!(
    /// One websocket attachment. A reconnecting member gets a new one.
    ConnectionId => "conn"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_carry_their_prefix() {
        assert!(LobbyId::new().as_str().starts_with("lobby-"));
        assert!(MessageId::new().as_str().starts_with("msg-"));
        assert!(ConnectionId::new().as_str().starts_with("conn-"));
    }

    #[test]
    fn raw_ids_round_trip_as_plain_strings() {
        let id = LobbyId::from_raw("lobby-abc");
        assert_eq!(id.to_string(), "lobby-abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"lobby-abc\"");
        let back: LobbyId = serde_json::from_str("\"lobby-abc\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn lobby_ids_sort_by_creation() {
        let ids: Vec<LobbyId> = (0..100).map(|_| LobbyId::new()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
