use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use thiserror::Error;

use lobby_core::LobbyError;
use lobby_store::StoreError;

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Error returned by REST handlers. Renders as `{"success": false, "message": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "success": false,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<LobbyError> for ApiError {
    fn from(err: LobbyError) -> Self {
        match err {
            LobbyError::LobbyNotFound(_) => Self::NotFound("Lobby not found".into()),
            LobbyError::MemberNotFound(_) => Self::Forbidden("User not in this lobby".into()),
            LobbyError::Capacity => Self::Unavailable(
                "A chat session is currently in progress. Please wait for it to complete or try again later."
                    .into(),
            ),
            LobbyError::Full { .. } => {
                Self::Unavailable("Lobby is full. Please wait for the current session to complete.".into())
            }
            LobbyError::MembershipExpired(_) => Self::Unavailable(
                "Your earlier seat in this session has expired. Please wait for the current session to complete."
                    .into(),
            ),
            LobbyError::InvalidMessage(msg) => Self::BadRequest(msg),
            LobbyError::QueueSaturated | LobbyError::QueueClosed | LobbyError::CoordinatorClosed => {
                Self::Unavailable("Chat service is shutting down".into())
            }
            LobbyError::Persistence(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}
