//! Networking layer.
//!
//! - `connection`: per-session read/write/dispatch pipeline
//! - `listener`: transport acceptor and accept loop
//! - `router`: authentication and routing into rooms
//! - `server`: server facade and configuration

pub mod connection;
pub mod listener;
pub mod router;
pub mod server;

pub use connection::{Connection, ConnectionCallback, ConnectionConfig, ConnectionError, PlayerBinding};
pub use listener::{Acceptor, Listener};
pub use router::Router;
pub use server::{ConfigError, GameServer, GameServerError, ServerConfig};
