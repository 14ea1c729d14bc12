//! Lockstep Room Server
//!
//! Binds the configured address and serves rooms until Ctrl-C.
//! Rooms can be preloaded from a JSON file named by `ROOM_SERVER_ROOMS_FILE`.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lockstep_room::{
    network::{GameServer, ServerConfig},
    room::RoomConfig,
    DEFAULT_TICK_RATE, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Lockstep Room Server v{}", VERSION);
    info!("Default Tick Rate: {} Hz", DEFAULT_TICK_RATE);

    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let server = Arc::new(GameServer::new(config));

    if let Ok(path) = std::env::var("ROOM_SERVER_ROOMS_FILE") {
        let rooms = load_rooms(&path)?;
        for room in rooms {
            let id = room.room_id;
            server
                .create_room(room)
                .await
                .with_context(|| format!("Failed to create room {}", id))?;
        }
        info!("Preloaded {} rooms from {}", server.room_count(), path);
    }

    let running = server.clone();
    let mut task = tokio::spawn(async move { running.run().await });

    let joined = tokio::select! {
        joined = &mut task => joined,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
            server.shutdown();
            (&mut task).await
        }
    };

    match joined.context("Server task panicked")? {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Server error: {}", e);
            Err(e.into())
        }
    }
}

fn load_rooms(path: &str) -> anyhow::Result<Vec<RoomConfig>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse rooms in {}", path))
}
