use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lobby_engine::{Coordinator, CoordinatorHandle, LobbyConfig, SessionRegistry};
use lobby_store::PersistenceGateway;
use lobby_telemetry::SqliteLogSink;

use crate::handlers;
use crate::settings::LobbySettings;
use crate::ws;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub coordinator: CoordinatorHandle,
    pub store: Arc<dyn PersistenceGateway>,
    pub logs: Option<Arc<SqliteLogSink>>,
    pub lobby: Arc<LobbyConfig>,
    /// Parent of every connection's cancellation token.
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/api/login", post(handlers::login))
        .route("/api/status", get(handlers::status))
        .route("/api/lobbies/{id}/messages", get(handlers::lobby_messages))
        .route("/api/logs", get(handlers::logs))
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };
    router.layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive())
}

/// Create the registry and coordinator, bind, and start serving.
pub async fn start(
    settings: &LobbySettings,
    store: Arc<dyn PersistenceGateway>,
    logs: Option<Arc<SqliteLogSink>>,
) -> Result<ServerHandle, std::io::Error> {
    let lobby = Arc::new(settings.lobby.clone());
    let shutdown = CancellationToken::new();

    let registry = Arc::new(SessionRegistry::new(lobby.capacity, lobby.member_retention));
    let (coordinator, coordinator_task) = Coordinator::spawn(
        Arc::clone(&registry),
        Arc::clone(&store),
        lobby.request_buffer,
        shutdown.clone(),
    );

    let state = AppState {
        registry: Arc::clone(&registry),
        coordinator,
        store,
        logs,
        lobby: Arc::clone(&lobby),
        shutdown: shutdown.clone(),
    };
    let router = build_router(state, settings.server.static_dir.as_deref());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(
        addr = %local_addr,
        capacity = lobby.capacity,
        queue_capacity = lobby.queue_capacity,
        "lobby server started"
    );

    let graceful = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        shutdown,
        server,
        coordinator: coordinator_task,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    coordinator: JoinHandle<()>,
}

impl ServerHandle {
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stop accepting requests, close every connection, and wait for the
    /// server and coordinator to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let drain = futures::future::join_all([self.server, self.coordinator]);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}");
        } else {
            info!("lobby server stopped");
        }
    }
}
