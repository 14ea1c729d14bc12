//! Room-scoped player session state.

use std::sync::Arc;

use tracing::debug;

use crate::core::PlayerId;
use crate::network::{Connection, ConnectionError};
use crate::protocol::Packet;

/// A roster member and its current connection.
#[derive(Debug)]
pub struct Player {
    id: PlayerId,
    seat_index: u32,
    ready: bool,
    progress: i32,
    last_heartbeat: i64,
    sent_frame: u32,
    connection: Option<Arc<Connection>>,
}

impl Player {
    /// Create an offline player.
    pub fn new(id: PlayerId, seat_index: u32) -> Self {
        Self {
            id,
            seat_index,
            ready: false,
            progress: 0,
            last_heartbeat: 0,
            sent_frame: 0,
            connection: None,
        }
    }

    /// Player id.
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Seat index.
    pub fn seat_index(&self) -> u32 {
        self.seat_index
    }

    /// Whether the player has declared ready.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Set readiness.
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Loading progress.
    pub fn progress(&self) -> i32 {
        self.progress
    }

    /// Set loading progress.
    pub fn set_progress(&mut self, progress: i32) {
        self.progress = progress;
    }

    /// Last heartbeat (unix seconds).
    pub fn last_heartbeat(&self) -> i64 {
        self.last_heartbeat
    }

    /// Record a heartbeat.
    pub fn refresh_heartbeat(&mut self, now: i64) {
        self.last_heartbeat = now;
    }

    /// Whether the last heartbeat is less than `threshold` seconds old.
    /// A heartbeat exactly `threshold` seconds old counts as stale.
    pub fn is_responsive(&self, now: i64, threshold: i64) -> bool {
        now - self.last_heartbeat < threshold
    }

    /// Next frame index this player has not been sent.
    pub fn sent_frame(&self) -> u32 {
        self.sent_frame
    }

    /// Advance the send cursor. Never moves it backwards.
    pub fn set_sent_frame(&mut self, frame: u32) {
        self.sent_frame = self.sent_frame.max(frame);
    }

    /// Restart the send cursor. Only valid when the frame buffer restarts.
    pub fn rewind_sent_frame(&mut self) {
        self.sent_frame = 0;
    }

    /// Attach a connection and mark online. Readiness must be declared again.
    pub fn connect(&mut self, conn: Arc<Connection>, now: i64) {
        self.connection = Some(conn);
        self.ready = false;
        self.last_heartbeat = now;
    }

    /// Whether a live connection is attached.
    pub fn is_online(&self) -> bool {
        self.connection.as_ref().is_some_and(|conn| !conn.is_closed())
    }

    /// Whether `conn` is this player's current connection.
    pub fn holds(&self, conn: &Arc<Connection>) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, conn))
    }

    /// Detach and return the current connection without closing it.
    pub fn take_connection(&mut self) -> Option<Arc<Connection>> {
        self.connection.take()
    }

    /// Close the connection and mark offline and not ready.
    pub fn clean_up(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        self.ready = false;
    }

    /// Queue a packet without blocking. Offline players are skipped.
    /// A full or closed queue closes the player's connection.
    pub fn send_message(&self, packet: Packet) -> Result<(), ConnectionError> {
        let Some(conn) = self.connection.as_ref() else {
            return Ok(());
        };

        match conn.try_send(packet) {
            Ok(()) => Ok(()),
            Err(e @ (ConnectionError::WouldBlock | ConnectionError::Closed)) => {
                debug!("Player {} dropped on send: {}", self.id, e);
                conn.close();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
