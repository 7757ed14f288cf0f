//! HTTP and websocket boundary for the lobby hub.

pub mod errors;
pub mod handlers;
pub mod server;
pub mod settings;
pub mod ws;

pub use errors::{ApiError, SettingsError};
pub use server::{build_router, start, AppState, ServerHandle};
pub use settings::{load_settings_from_path, LobbySettings};
