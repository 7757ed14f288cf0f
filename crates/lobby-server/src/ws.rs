//! Websocket upgrade and the adapter between axum frames and pump frames.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use lobby_core::LobbyId;
use lobby_engine::pump::serve_connection;
use lobby_engine::{ConnectionContext, Frame};

use crate::errors::ApiError;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub email: Option<String>,
    pub lobby_id: Option<String>,
}

/// `GET /ws?email=..&lobby_id=..`
///
/// Parameters, membership and the retention window are checked before the
/// upgrade, so a refused client gets a plain HTTP error and no pumps start.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let (Some(email), Some(lobby_id)) = (non_empty(params.email), non_empty(params.lobby_id)) else {
        return ApiError::BadRequest("email and lobby_id are required".into()).into_response();
    };
    let lobby_id = LobbyId::from_raw(lobby_id);

    let session = match state.registry.lookup(&lobby_id) {
        Ok(session) => session,
        Err(e) => return ApiError::from(e).into_response(),
    };
    if !session.is_member(&email) {
        return ApiError::Forbidden("User not in this lobby".into()).into_response();
    }
    if !session.can_rejoin(&email, state.registry.retention(), Utc::now()) {
        info!(email = %email, lobby_id = %lobby_id, "expired member refused");
        return ApiError::Forbidden("Your seat in this lobby has expired".into()).into_response();
    }

    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, email, lobby_id, state)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_socket(socket: WebSocket, email: String, lobby_id: LobbyId, state: AppState) {
    let ctx = ConnectionContext::new(email, lobby_id);
    info!(
        email = %ctx.identity,
        lobby_id = %ctx.lobby_id,
        connection_id = %ctx.connection_id,
        "websocket connected"
    );

    let (ws_tx, ws_rx) = socket.split();
    let stream = ws_rx.map(|msg| msg.map(frame_from_ws));
    let sink = ws_tx.with(|frame: Frame| futures::future::ready(Ok::<_, axum::Error>(frame_to_ws(frame))));

    let served = serve_connection(
        stream,
        sink,
        ctx.clone(),
        state.coordinator.clone(),
        state.lobby.queue_capacity,
        state.lobby.heartbeat_interval(),
        state.shutdown.child_token(),
    )
    .await;

    match served {
        Ok(pumps) => {
            pumps.join().await;
            info!(email = %ctx.identity, connection_id = %ctx.connection_id, "websocket closed");
        }
        Err(e) => warn!(email = %ctx.identity, error = %e, "could not register connection"),
    }
}

fn frame_from_ws(msg: WsMessage) -> Frame {
    match msg {
        WsMessage::Text(text) => Frame::Text(text.to_string()),
        WsMessage::Binary(bytes) => Frame::Text(String::from_utf8_lossy(&bytes).into_owned()),
        WsMessage::Ping(_) => Frame::Ping,
        WsMessage::Pong(_) => Frame::Pong,
        WsMessage::Close(_) => Frame::Close,
    }
}

fn frame_to_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Ping => WsMessage::Ping(Vec::new().into()),
        Frame::Pong => WsMessage::Pong(Vec::new().into()),
        Frame::Close => WsMessage::Close(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_map_both_ways() {
        assert_eq!(frame_from_ws(WsMessage::Text("hi".into())), Frame::Text("hi".into()));
        assert_eq!(frame_from_ws(WsMessage::Binary(b"{}".to_vec().into())), Frame::Text("{}".into()));
        assert_eq!(frame_from_ws(WsMessage::Close(None)), Frame::Close);
        assert!(matches!(frame_to_ws(Frame::Ping), WsMessage::Ping(_)));
        assert!(matches!(frame_to_ws(Frame::Close), WsMessage::Close(None)));
        match frame_to_ws(Frame::Text("x".into())) {
            WsMessage::Text(t) => assert_eq!(t.as_str(), "x"),
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
