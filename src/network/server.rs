//! Game Server
//!
//! Ties the pieces together: an acceptor feeding the listener, the router
//! as every connection's callback, the room registry and its sweeper.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use super::connection::ConnectionConfig;
use super::listener::{Acceptor, Listener};
use super::router::Router;
use crate::core::RoomId;
use crate::protocol::{CodecConfig, Endianness, PacketCodec, DEFAULT_MAX_PAYLOAD};
use crate::room::{Room, RoomConfig, RoomError, RoomManager};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Per-connection queues and timeouts.
    pub connection: ConnectionConfig,
    /// Wire framing.
    pub codec: CodecConfig,
    /// How often finished rooms are swept.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 10086)),
            connection: ConnectionConfig::default(),
            codec: CodecConfig::default(),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value could not be parsed.
    #[error("Invalid value {value:?} for {key}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

impl ServerConfig {
    /// Create config from environment variables. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse(&lookup, "ROOM_SERVER_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(limit) = parse(&lookup, "ROOM_SERVER_SEND_QUEUE")? {
            config.connection.send_queue_limit = limit;
        }
        if let Some(limit) = parse(&lookup, "ROOM_SERVER_RECEIVE_QUEUE")? {
            config.connection.receive_queue_limit = limit;
        }
        if let Some(secs) = parse(&lookup, "ROOM_SERVER_READ_TIMEOUT_SECS")? {
            config.connection.read_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "ROOM_SERVER_WRITE_TIMEOUT_SECS")? {
            config.connection.write_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = parse::<usize, _>(&lookup, "ROOM_SERVER_MAX_PAYLOAD")? {
            config.codec.max_payload = max.min(u16::MAX as usize);
        }
        if let Some(secs) = parse(&lookup, "ROOM_SERVER_SWEEP_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }

        let little_endian = lookup("ROOM_SERVER_LITTLE_ENDIAN")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if little_endian {
            config.codec.endianness = Endianness::Little;
        }

        if config.codec.max_payload == 0 {
            config.codec.max_payload = DEFAULT_MAX_PAYLOAD;
        }
        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Room error.
    #[error("Room error: {0}")]
    Room(#[from] RoomError),
}

/// Room server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Live rooms.
    manager: Arc<RoomManager>,
    /// Callback for every connection.
    router: Arc<Router>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
    /// Set once shutdown is requested.
    shutting_down: AtomicBool,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let manager = Arc::new(RoomManager::new());

        Self {
            config,
            router: Arc::new(Router::new(manager.clone())),
            manager,
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Bind the configured TCP address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Room server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve sessions from any acceptor until shutdown, then stop every room.
    pub async fn serve<A: Acceptor>(&self, acceptor: A) -> Result<(), GameServerError> {
        let listener_shutdown = self.shutdown_tx.subscribe();
        let sweeper_shutdown = self.shutdown_tx.subscribe();
        if self.shutting_down.load(Ordering::Acquire) {
            return Ok(());
        }

        let sweeper = self
            .manager
            .spawn_sweeper(self.config.sweep_interval, sweeper_shutdown);
        let listener = Listener::new(
            self.router.clone(),
            self.config.connection,
            PacketCodec::from(self.config.codec),
        );

        listener.run(acceptor, listener_shutdown).await;

        let _ = sweeper.await;
        self.manager.close_all().await;
        info!("Room server stopped");
        Ok(())
    }

    /// Create a room, or return the existing room with the same id.
    pub async fn create_room(&self, config: RoomConfig) -> Result<Arc<Room>, GameServerError> {
        Ok(self.manager.create_room(config).await?)
    }

    /// Get a room by id.
    pub async fn get_room(&self, id: RoomId) -> Option<Arc<Room>> {
        self.manager.get_room(id).await
    }

    /// Room registry.
    pub fn manager(&self) -> &Arc<RoomManager> {
        &self.manager
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }

    /// Get open connection count.
    pub fn connection_count(&self) -> u64 {
        self.router.connection_count()
    }

    /// Get live room count.
    pub fn room_count(&self) -> usize {
        self.manager.room_count()
    }
}
