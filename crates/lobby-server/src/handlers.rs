//! REST handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use lobby_core::LobbyId;
use lobby_store::StoredMessage;
use lobby_telemetry::{LogQuery, LogRecord};

use crate::errors::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lobby_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// `POST /api/login`
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = payload.map_err(|_| ApiError::BadRequest("Invalid request body".into()))?;
    let email = request.email.trim();
    if email.is_empty() {
        return Err(ApiError::BadRequest("Email is required".into()));
    }

    let admission = state.registry.login(email).map_err(|e| {
        info!(email, reason = e.error_kind(), "login refused");
        ApiError::from(e)
    })?;

    let message = if admission.reconnected {
        "Reconnecting to your lobby. You'll see all previous messages."
    } else {
        "User registered successfully"
    };
    Ok(Json(LoginResponse {
        success: true,
        message: message.to_string(),
        lobby_id: Some(admission.session.id().to_string()),
        email: Some(admission.member.identity),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub current_users: usize,
    pub max_users: usize,
    pub lobby_id: String,
    pub users: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `GET /api/status`
///
/// Reports the lobby taking new members, or else the running one.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    if let Some(session) = state.registry.list_admissible() {
        let presence = session.presence();
        return Json(StatusResponse {
            current_users: presence.active_count,
            max_users: presence.capacity,
            lobby_id: session.id().to_string(),
            users: presence.active_members,
            message: None,
        });
    }

    match state.registry.most_recent() {
        Some(session) => {
            let presence = session.presence();
            Json(StatusResponse {
                current_users: presence.active_count,
                max_users: presence.capacity,
                lobby_id: session.id().to_string(),
                users: presence.active_members,
                message: Some("A chat session is currently in progress.".into()),
            })
        }
        None => Json(StatusResponse {
            current_users: 0,
            max_users: state.registry.capacity(),
            lobby_id: String::new(),
            users: Vec::new(),
            message: Some("No active lobby available. A session may be in progress.".into()),
        }),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub lobby_id: String,
    pub total_messages: usize,
    pub messages: Vec<StoredMessage>,
}

/// `GET /api/lobbies/{id}/messages`: the persisted log, including lobbies
/// from earlier runs.
pub async fn lobby_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let lobby_id = LobbyId::from_raw(id);
    let messages = state.store.list_all(&lobby_id)?;
    Ok(Json(MessagesResponse {
        lobby_id: lobby_id.to_string(),
        total_messages: messages.len(),
        messages,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsParams {
    pub level: Option<String>,
    pub target: Option<String>,
    pub lobby_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub enabled: bool,
    pub logs: Vec<LogRecord>,
}

/// `GET /api/logs`: persisted warnings and errors.
pub async fn logs(
    State(state): State<AppState>,
    Query(params): Query<LogsParams>,
) -> Result<Json<LogsResponse>, ApiError> {
    let Some(sink) = state.logs.as_ref() else {
        return Ok(Json(LogsResponse {
            enabled: false,
            logs: Vec::new(),
        }));
    };
    let query = LogQuery {
        level: params.level,
        target: params.target,
        lobby_id: params.lobby_id,
        since: params.since,
        limit: Some(params.limit.unwrap_or(100).min(1000)),
    };
    let logs = sink.query(&query).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(LogsResponse { enabled: true, logs }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let running = !state.coordinator.is_closed();
    let status = if running { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let body = serde_json::json!({
        "status": if running { "healthy" } else { "stopping" },
        "lobbies": state.registry.len(),
        "capacity": state.registry.capacity(),
    });
    (status, Json(body))
}
