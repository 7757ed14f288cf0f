//! Chat and system messages exchanged over the real-time connection.
//!
//! The in-memory [`Message`] is a tagged union (`Chat` or a `SystemAction`);
//! on the wire it is flattened to the JSON shape clients expect:
//!
//! ```json
//! {"type":"system_action","system_action":"user_joined","username":"a@x.io",
//!  "content":"a@x.io joined the chat","lobby_id":"lobby-…","timestamp":"…",
//!  "user_count":2,"max_users":5,"user_list":["a@x.io","b@x.io"]}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::LobbyError;
use crate::ids::LobbyId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemAction {
    Welcome,
    UserJoined,
    UserLeft,
}

impl std::fmt::Display for SystemAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Welcome => write!(f, "welcome"),
            Self::UserJoined => write!(f, "user_joined"),
            Self::UserLeft => write!(f, "user_left"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    SystemAction(SystemAction),
}

/// Membership snapshot attached to system actions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Presence {
    pub active_count: usize,
    pub capacity: usize,
    pub active_members: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireMessage", try_from = "WireMessage")]
pub struct Message {
    pub kind: MessageKind,
    pub lobby_id: LobbyId,
    pub author: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub presence: Option<Presence>,
}

impl Message {
    /// A chat message authored by `author`, stamped now.
    pub fn chat(lobby_id: LobbyId, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Chat,
            lobby_id,
            author: Some(author.into()),
            content: content.into(),
            timestamp: Utc::now(),
            presence: None,
        }
    }

    /// A system action about `subject`, carrying the current presence snapshot.
    pub fn system(
        action: SystemAction,
        lobby_id: LobbyId,
        subject: &str,
        presence: Presence,
    ) -> Self {
        let (author, content) = match action {
            SystemAction::Welcome => (None, format!("Welcome, {subject}!")),
            SystemAction::UserJoined => (Some(subject.to_string()), format!("{subject} joined the chat")),
            SystemAction::UserLeft => (Some(subject.to_string()), format!("{subject} left the chat")),
        };
        Self {
            kind: MessageKind::SystemAction(action),
            lobby_id,
            author,
            content,
            timestamp: Utc::now(),
            presence: Some(presence),
        }
    }

    pub fn is_chat(&self) -> bool {
        self.kind == MessageKind::Chat
    }

    pub fn system_action(&self) -> Option<SystemAction> {
        match self.kind {
            MessageKind::SystemAction(action) => Some(action),
            MessageKind::Chat => None,
        }
    }

    pub fn to_json(&self) -> Result<String, LobbyError> {
        serde_json::to_string(self).map_err(|e| LobbyError::InvalidMessage(e.to_string()))
    }
}

/// Payload accepted from clients. Only `content` is read, and a missing one
/// is an empty message; everything else is stamped by the server.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(default)]
    content: String,
}

/// Decode an inbound text frame into a chat message from `author`.
pub fn decode_chat(raw: &str, lobby_id: &LobbyId, author: &str) -> Result<Message, LobbyError> {
    let frame: InboundFrame =
        serde_json::from_str(raw).map_err(|e| LobbyError::InvalidMessage(e.to_string()))?;
    Ok(Message::chat(lobby_id.clone(), author, frame.content))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireType {
    Message,
    SystemAction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    message_type: WireType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_action: Option<SystemAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    content: String,
    lobby_id: LobbyId,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_users: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_list: Option<Vec<String>>,
}

impl From<Message> for WireMessage {
    fn from(msg: Message) -> Self {
        let (message_type, system_action) = match msg.kind {
            MessageKind::Chat => (WireType::Message, None),
            MessageKind::SystemAction(action) => (WireType::SystemAction, Some(action)),
        };
        let (user_count, max_users, user_list) = match msg.presence {
            Some(p) => (Some(p.active_count), Some(p.capacity), Some(p.active_members)),
            None => (None, None, None),
        };
        Self {
            message_type,
            system_action,
            username: msg.author,
            content: msg.content,
            lobby_id: msg.lobby_id,
            timestamp: msg.timestamp,
            user_count,
            max_users,
            user_list,
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let kind = match (wire.message_type, wire.system_action) {
            (WireType::Message, _) => MessageKind::Chat,
            (WireType::SystemAction, Some(action)) => MessageKind::SystemAction(action),
            (WireType::SystemAction, None) => {
                return Err("system_action message without an action".into())
            }
        };
        let presence = match (wire.user_count, wire.max_users) {
            (Some(active_count), Some(capacity)) => Some(Presence {
                active_count,
                capacity,
                active_members: wire.user_list.unwrap_or_default(),
            }),
            _ => None,
        };
        Ok(Self {
            kind,
            lobby_id: wire.lobby_id,
            author: wire.username,
            content: wire.content,
            timestamp: wire.timestamp,
            presence,
        })
    }
}
