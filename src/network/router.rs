//! Router
//!
//! Connection callback installed on every accepted connection. A fresh
//! connection must authenticate with a Connect message before anything
//! is forwarded to a room; afterwards its messages are routed by the
//! [`PlayerBinding`] attached to it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionCallback, PlayerBinding};
use crate::protocol::{ConnectRequest, ConnectResponse, ErrorCode, MessageId, Packet};
use crate::room::{Room, RoomManager};

/// Authenticating connection router.
pub struct Router {
    manager: Arc<RoomManager>,
    live_connections: AtomicU64,
}

impl Router {
    /// Create a router over a room registry.
    pub fn new(manager: Arc<RoomManager>) -> Self {
        Self {
            manager,
            live_connections: AtomicU64::new(0),
        }
    }

    /// Open connections.
    pub fn connection_count(&self) -> u64 {
        self.live_connections.load(Ordering::Acquire)
    }

    /// Checks run in a fixed order: room exists, room not over, player on
    /// roster, token matches.
    async fn authenticate(&self, request: &ConnectRequest) -> Result<Arc<Room>, ErrorCode> {
        let room = self
            .manager
            .get_room(request.room_id)
            .await
            .ok_or(ErrorCode::NoRoom)?;
        if room.is_over() {
            return Err(ErrorCode::RoomOver);
        }
        if !room.has_player(request.player_id) {
            return Err(ErrorCode::NoPlayer);
        }
        if !room.verify_token(&request.token) {
            return Err(ErrorCode::BadToken);
        }
        Ok(room)
    }

    async fn handle_connect(&self, conn: &Arc<Connection>, packet: &Packet) -> bool {
        let request: ConnectRequest = match packet.decode() {
            Ok(request) => request,
            Err(e) => {
                warn!("{} sent a malformed connect: {}", conn.id(), e);
                return false;
            }
        };

        let binding = PlayerBinding {
            room_id: request.room_id,
            player_id: request.player_id,
        };
        if let Some(current) = conn.binding() {
            if current != binding {
                warn!(
                    "{} bound to room {} player {} tried to reconnect as room {} player {}",
                    conn.id(),
                    current.room_id,
                    current.player_id,
                    binding.room_id,
                    binding.player_id
                );
                return false;
            }
        }

        match self.authenticate(&request).await {
            Ok(room) => {
                conn.bind(binding);
                info!(
                    "{} authenticated into room {} as player {}",
                    conn.id(),
                    request.room_id,
                    request.player_id
                );
                room.on_connect(conn).await
            }
            Err(code) => {
                info!(
                    "{} connect to room {} as player {} refused: {:?}",
                    conn.id(),
                    request.room_id,
                    request.player_id,
                    code
                );
                if let Ok(reply) = Packet::with_message(MessageId::Connect, &ConnectResponse::new(code)) {
                    let _ = conn.try_send(reply);
                }
                true
            }
        }
    }

    async fn forward(&self, conn: &Arc<Connection>, packet: Packet) -> bool {
        let Some(binding) = conn.binding() else {
            debug!("{} sent message {} before connect", conn.id(), packet.raw_id());
            return false;
        };
        match self.manager.get_room(binding.room_id).await {
            Some(room) => room.on_message(conn, packet).await,
            None => false,
        }
    }
}

#[async_trait]
impl ConnectionCallback for Router {
    async fn on_connect(&self, _conn: &Arc<Connection>) -> bool {
        self.live_connections.fetch_add(1, Ordering::AcqRel);
        true
    }

    async fn on_message(&self, conn: &Arc<Connection>, packet: Packet) -> bool {
        match packet.message_id() {
            Some(MessageId::Connect) => self.handle_connect(conn, &packet).await,
            Some(MessageId::End) => {
                // Terminal: echo, then close once the echo is flushed.
                let _ = conn.try_send(packet);
                false
            }
            Some(MessageId::Heartbeat) if conn.binding().is_none() => {
                let _ = conn.try_send(Packet::empty(MessageId::Heartbeat));
                true
            }
            _ => self.forward(conn, packet).await,
        }
    }

    async fn on_close(&self, conn: &Arc<Connection>) {
        self.live_connections.fetch_sub(1, Ordering::AcqRel);

        if let Some(binding) = conn.binding() {
            if let Some(room) = self.manager.get_room(binding.room_id).await {
                room.on_close(conn).await;
            }
        }
    }
}
