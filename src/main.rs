use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use lobby_server::settings::{self, LobbySettings};
use lobby_store::{Database, MessageRepo};

/// Bounded single-room real-time chat hub.
#[derive(Debug, Parser)]
#[command(name = "lobby", version, about)]
struct Args {
    /// Settings file (defaults to ~/.lobby/settings.json).
    #[arg(long, env = "LOBBY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Members per lobby.
    #[arg(long)]
    capacity: Option<usize>,

    /// Chat database path.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Directory served at `/`.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn apply(&self, settings: &mut LobbySettings) {
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(capacity) = self.capacity {
            settings.lobby.capacity = capacity;
        }
        if let Some(path) = &self.db_path {
            settings.storage.database_path = path.clone();
        }
        if let Some(dir) = &self.static_dir {
            settings.server.static_dir = Some(dir.clone());
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let path = args.config.clone().unwrap_or_else(settings::settings_path);
    let mut settings = settings::load_settings_from_path(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;
    args.apply(&mut settings);
    settings.validate()?;

    let telemetry = lobby_telemetry::init_telemetry(settings.logging.telemetry_config());
    tracing::info!(config = %path.display(), "starting lobby");

    let db = Database::open(&settings.storage.database_path).context("opening chat database")?;
    let store = Arc::new(MessageRepo::new(db));

    let handle = lobby_server::start(&settings, store, telemetry.log_sink())
        .await
        .context("starting server")?;
    tracing::info!(port = handle.port, "lobby ready");

    tokio::signal::ctrl_c().await.context("listening for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
