pub mod errors;
pub mod ids;
pub mod message;

pub use errors::LobbyError;
pub use ids::{ConnectionId, LobbyId, MessageId};
pub use message::{Message, MessageKind, Presence, SystemAction};
