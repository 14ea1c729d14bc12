//! Room Manager
//!
//! Concurrent registry of live rooms. Lookups, inserts and removals are
//! single operations under one lock; the sweep snapshots finished rooms
//! first and only then stops and removes them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use super::actor::Room;
use super::config::{RoomConfig, RoomError};
use crate::core::RoomId;

/// Room registry.
pub struct RoomManager {
    /// Live rooms.
    rooms: RwLock<BTreeMap<RoomId, Arc<Room>>>,
    /// Live room count.
    room_count: AtomicUsize,
}

impl RoomManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(BTreeMap::new()),
            room_count: AtomicUsize::new(0),
        }
    }

    /// Register a running room.
    pub async fn add_room(&self, room: Arc<Room>) -> Result<(), RoomError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.id()) {
            return Err(RoomError::AlreadyExists(room.id()));
        }
        rooms.insert(room.id(), room);
        self.room_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Spawn and register a room, or return the one already registered under its id.
    pub async fn create_room(&self, config: RoomConfig) -> Result<Arc<Room>, RoomError> {
        let mut rooms = self.rooms.write().await;
        if let Some(existing) = rooms.get(&config.room_id) {
            return Ok(existing.clone());
        }

        let room = Room::spawn(config)?;
        rooms.insert(room.id(), room.clone());
        self.room_count.fetch_add(1, Ordering::AcqRel);
        Ok(room)
    }

    /// Get a room by id.
    pub async fn get_room(&self, id: RoomId) -> Option<Arc<Room>> {
        let rooms = self.rooms.read().await;
        rooms.get(&id).cloned()
    }

    /// Remove a room without stopping it.
    pub async fn remove_room(&self, id: RoomId) -> Option<Arc<Room>> {
        let mut rooms = self.rooms.write().await;
        let removed = rooms.remove(&id);
        if removed.is_some() {
            self.room_count.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Live room count.
    pub fn room_count(&self) -> usize {
        self.room_count.load(Ordering::Acquire)
    }

    /// Stop and remove rooms whose game is over or that were stopped.
    /// Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let finished: Vec<Arc<Room>> = {
            let rooms = self.rooms.read().await;
            rooms
                .values()
                .filter(|room| room.is_over() || room.is_closed())
                .cloned()
                .collect()
        };

        let mut removed = 0;
        for room in finished {
            room.stop();
            if self.remove_if_same(&room).await {
                info!("Swept room {}", room.id());
                removed += 1;
            }
        }
        removed
    }

    /// Remove `room` only if it is still the one registered under its id.
    async fn remove_if_same(&self, room: &Arc<Room>) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get(&room.id()) {
            Some(current) if Arc::ptr_eq(current, room) => {
                rooms.remove(&room.id());
                self.room_count.fetch_sub(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    /// Stop and remove every room.
    pub async fn close_all(&self) {
        let rooms = {
            let mut rooms = self.rooms.write().await;
            self.room_count.store(0, Ordering::Release);
            std::mem::take(&mut *rooms)
        };

        for room in rooms.values() {
            room.stop();
        }
        info!("Closed {} rooms", rooms.len());
    }

    /// Run `sweep` every `period` until shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.sweep().await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
