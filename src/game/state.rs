//! Game State Machine
//!
//! ```text
//! Ready ──(all ready | ready timeout)──► Gaming ──(results | frame ceiling)──► Over ──► Stopped
//!   └──────────────(ready timeout, nobody online)────────────────────────────────┘
//! ```
//!
//! A `Game` is owned by exactly one room actor and is never shared, so
//! nothing here locks.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::events::GameListener;
use super::lockstep::LockStep;
use super::player::Player;
use crate::core::{PlayerId, RoomId};
use crate::network::{Connection, ConnectionError};
use crate::protocol::{
    CodecError, ConnectResponse, ErrorCode, FrameBatch, FrameData, InputCommand, InputData,
    JoinRoomReply, MessageId, Packet, PeerInfo, ProgressNotice, ProgressReport, ResultReport,
    StartNotice,
};
use crate::{
    BAD_NETWORK_THRESHOLD_SECS, BROADCAST_OFFSET_FRAMES, MAX_FRAMES_PER_MESSAGE, MAX_GAME_FRAMES,
    MAX_READY_TIME_SECS,
};

/// Game lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GameState {
    /// Waiting for players to load.
    Ready,
    /// Lockstep running.
    Gaming,
    /// Finished, game-over not yet announced.
    Over,
    /// Terminal.
    Stopped,
}

/// Game tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Seconds to wait for every player to be ready.
    pub ready_timeout_secs: u64,
    /// Frame ceiling; the game ends when reached.
    pub max_game_frames: u32,
    /// Broadcast at least every this many frames even without new input.
    pub broadcast_offset_frames: u32,
    /// Frames per Frame packet.
    pub max_frames_per_message: usize,
    /// Players silent for longer than this are skipped by broadcast.
    pub bad_network_threshold_secs: i64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: MAX_READY_TIME_SECS,
            max_game_frames: MAX_GAME_FRAMES,
            broadcast_offset_frames: BROADCAST_OFFSET_FRAMES,
            max_frames_per_message: MAX_FRAMES_PER_MESSAGE,
            bad_network_threshold_secs: BAD_NETWORK_THRESHOLD_SECS,
        }
    }
}

/// Join failures. The room closes the connection on any of them.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// Player is not on the roster.
    #[error("Player {0} is not on the roster")]
    UnknownPlayer(PlayerId),

    /// Game already over.
    #[error("Game is already over")]
    GameFinished,
}

/// Per-room game.
pub struct Game {
    room_id: RoomId,
    created_at: i64,
    start_time: i64,
    random_seed: u64,
    state: GameState,
    config: GameConfig,
    players: BTreeMap<PlayerId, Player>,
    lockstep: LockStep,
    results: BTreeMap<PlayerId, PlayerId>,
    dirty: bool,
    last_broadcast_frame: u32,
    listener: Box<dyn GameListener>,
}

impl Game {
    /// Create a game for a fixed roster. Seats follow roster order, from 1.
    pub fn new(
        room_id: RoomId,
        roster: &[PlayerId],
        random_seed: u64,
        config: GameConfig,
        listener: Box<dyn GameListener>,
        now: i64,
    ) -> Self {
        let players = roster
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, Player::new(id, i as u32 + 1)))
            .collect();

        Self {
            room_id,
            created_at: now,
            start_time: 0,
            random_seed,
            state: GameState::Ready,
            config,
            players,
            lockstep: LockStep::new(),
            results: BTreeMap::new(),
            dirty: false,
            last_broadcast_frame: 0,
            listener,
        }
    }

    /// Room id.
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Current state.
    pub fn state(&self) -> GameState {
        self.state
    }

    /// Start time (unix seconds), zero before the game starts.
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Frame buffer.
    pub fn lockstep(&self) -> &LockStep {
        &self.lockstep
    }

    /// Declared outcomes, reporter -> winner.
    pub fn results(&self) -> &BTreeMap<PlayerId, PlayerId> {
        &self.results
    }

    /// Player by id.
    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.get(&player_id)
    }

    /// Players with a live connection.
    pub fn online_player_count(&self) -> usize {
        self.players.values().filter(|p| p.is_online()).count()
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    /// Attach a connection to a roster player, replacing any previous one.
    pub fn join_game(&mut self, player_id: PlayerId, conn: Arc<Connection>, now: i64) -> Result<(), JoinError> {
        if self.state >= GameState::Over {
            if let Some(packet) = connect_ack(ErrorCode::RoomOver) {
                let _ = conn.try_send(packet);
            }
            return Err(JoinError::GameFinished);
        }

        let player = self
            .players
            .get_mut(&player_id)
            .ok_or(JoinError::UnknownPlayer(player_id))?;

        if let Some(previous) = player.take_connection() {
            if !Arc::ptr_eq(&previous, &conn) {
                previous.unbind();
                previous.close();
                info!("Room {} player {} replaced {}", self.room_id, player_id, previous.id());
            }
        }

        player.connect(conn, now);
        if let Some(packet) = connect_ack(ErrorCode::Ok) {
            let _ = player.send_message(packet);
        }

        debug!("Room {} player {} joined", self.room_id, player_id);
        self.listener.on_join_game(self.room_id, player_id);
        Ok(())
    }

    /// Detach a player if `conn` is still its current connection.
    pub fn leave_game(&mut self, player_id: PlayerId, conn: &Arc<Connection>) -> bool {
        let Some(player) = self.players.get_mut(&player_id) else {
            return false;
        };
        if !player.holds(conn) {
            debug!("Room {} ignoring stale leave from {}", self.room_id, conn.id());
            return false;
        }

        player.clean_up();
        debug!("Room {} player {} left", self.room_id, player_id);
        self.listener.on_leave_game(self.room_id, player_id);
        true
    }

    // =========================================================================
    // MESSAGES
    // =========================================================================

    /// Handle one message from a joined player. Bad payloads are logged and dropped.
    pub fn process_message(&mut self, player_id: PlayerId, packet: Packet, now: i64) {
        if !self.players.contains_key(&player_id) {
            warn!("Room {} message from unknown player {}", self.room_id, player_id);
            return;
        }

        match packet.message_id() {
            Some(MessageId::JoinRoom) => self.on_join_room(player_id),
            Some(MessageId::Progress) => self.on_progress(player_id, &packet),
            Some(MessageId::Heartbeat) => self.on_heartbeat(player_id, now),
            Some(MessageId::Ready) => self.on_ready(player_id),
            Some(MessageId::Input) => self.on_input(player_id, &packet),
            Some(MessageId::Result) => self.on_result(player_id, &packet),
            _ => debug!(
                "Room {} ignoring message {} from player {}",
                self.room_id,
                packet.raw_id(),
                player_id
            ),
        }
    }

    fn on_join_room(&mut self, player_id: PlayerId) {
        let Some(player) = self.players.get(&player_id) else {
            return;
        };

        let reply = JoinRoomReply {
            seat_index: player.seat_index(),
            random_seed: self.random_seed,
            others: self
                .players
                .values()
                .filter(|p| p.id() != player_id)
                .map(|p| PeerInfo {
                    player_id: p.id(),
                    progress: p.progress(),
                })
                .collect(),
        };

        if let Some(packet) = encode(MessageId::JoinRoom, &reply) {
            let _ = player.send_message(packet);
        }
    }

    fn on_progress(&mut self, player_id: PlayerId, packet: &Packet) {
        if self.state != GameState::Ready {
            return;
        }
        let report: ProgressReport = match packet.decode() {
            Ok(report) => report,
            Err(e) => {
                warn!("Room {} bad progress from player {}: {}", self.room_id, player_id, e);
                return;
            }
        };

        if let Some(player) = self.players.get_mut(&player_id) {
            player.set_progress(report.progress);
        }

        let notice = ProgressNotice {
            player_id,
            progress: report.progress,
        };
        if let Some(packet) = encode(MessageId::Progress, &notice) {
            self.broadcast(packet, Some(player_id));
        }
    }

    fn on_heartbeat(&mut self, player_id: PlayerId, now: i64) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.refresh_heartbeat(now);
            let _ = player.send_message(Packet::empty(MessageId::Heartbeat));
        }
    }

    fn on_ready(&mut self, player_id: PlayerId) {
        if self.state > GameState::Gaming {
            debug!("Room {} ignoring ready from player {} in {:?}", self.room_id, player_id, self.state);
            return;
        }
        let Some(player) = self.players.get_mut(&player_id) else {
            return;
        };
        if !player.is_ready() {
            player.set_ready(true);
            let _ = player.send_message(Packet::empty(MessageId::Ready));
        }

        if self.state != GameState::Gaming {
            return;
        }

        // Reconnect: resend the start time, then replay everything up to the current frame.
        if let Some(packet) = encode(MessageId::Start, &StartNotice { timestamp: self.start_time }) {
            let _ = player.send_message(packet);
        }
        let frame_count = self.lockstep.frame_count();
        let frames = self.lockstep.snapshot(0, frame_count);
        info!(
            "Room {} replaying {} frames to player {}",
            self.room_id,
            frame_count,
            player_id
        );
        if send_frames(player, &frames, self.config.max_frames_per_message).is_ok() {
            player.set_sent_frame(frame_count);
        }
    }

    fn on_input(&mut self, player_id: PlayerId, packet: &Packet) {
        if self.state != GameState::Gaming {
            return;
        }
        let command: InputCommand = match packet.decode() {
            Ok(command) => command,
            Err(e) => {
                warn!("Room {} bad input from player {}: {}", self.room_id, player_id, e);
                return;
            }
        };
        let Some(player) = self.players.get(&player_id) else {
            return;
        };

        let input = InputData::from_command(player_id, player.seat_index(), command);
        if self.lockstep.push_command(input) {
            self.dirty = true;
        }
    }

    fn on_result(&mut self, player_id: PlayerId, packet: &Packet) {
        let report: ResultReport = match packet.decode() {
            Ok(report) => report,
            Err(e) => {
                warn!("Room {} bad result from player {}: {}", self.room_id, player_id, e);
                return;
            }
        };

        self.results.insert(player_id, report.winner_id);
        if let Some(player) = self.players.get(&player_id) {
            let _ = player.send_message(Packet::empty(MessageId::Result));
        }
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Advance the state machine. Returns false once stopped.
    pub fn tick(&mut self, now: i64) -> bool {
        match self.state {
            GameState::Ready => {
                if self.all_ready() {
                    self.start(now);
                } else if now >= self.ready_deadline() {
                    if self.online_player_count() > 0 {
                        info!("Room {} ready timeout, force starting", self.room_id);
                        self.start(now);
                    } else {
                        info!("Room {} ready timeout with nobody online", self.room_id);
                        self.transition(GameState::Over);
                    }
                }
                true
            }
            GameState::Gaming => {
                if self.all_results_in() {
                    info!("Room {} all results declared", self.room_id);
                    self.transition(GameState::Over);
                } else if self.lockstep.frame_count() > self.config.max_game_frames {
                    info!("Room {} reached frame ceiling", self.room_id);
                    self.transition(GameState::Over);
                } else {
                    self.lockstep.tick();
                    self.broadcast_frames(now);
                }
                true
            }
            GameState::Over => {
                info!("Room {} game over", self.room_id);
                self.listener.on_game_over(self.room_id, &self.results);
                self.transition(GameState::Stopped);
                true
            }
            GameState::Stopped => false,
        }
    }

    /// End the game on the next tick, whatever its state.
    pub fn force_over(&mut self) {
        if self.state < GameState::Over {
            info!("Room {} forced over", self.room_id);
            self.transition(GameState::Over);
        }
    }

    /// Broadcast Close and disconnect every player.
    pub fn close(&mut self) {
        self.broadcast(Packet::empty(MessageId::Close), None);
        for player in self.players.values_mut() {
            player.clean_up();
        }
    }

    fn ready_deadline(&self) -> i64 {
        self.created_at + self.config.ready_timeout_secs as i64
    }

    fn all_ready(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|p| p.is_ready())
    }

    fn all_results_in(&self) -> bool {
        let mut online = self.players.values().filter(|p| p.is_online()).peekable();
        online.peek().is_some() && online.all(|p| self.results.contains_key(&p.id()))
    }

    fn start(&mut self, now: i64) {
        self.lockstep.reset();
        self.start_time = now;
        self.dirty = false;
        self.last_broadcast_frame = 0;

        for player in self.players.values_mut() {
            player.set_ready(true);
            player.set_progress(100);
            player.rewind_sent_frame();
        }

        if let Some(packet) = encode(MessageId::Start, &StartNotice { timestamp: now }) {
            self.broadcast(packet, None);
        }

        info!("Room {} started with {} players online", self.room_id, self.online_player_count());
        self.transition(GameState::Gaming);
        self.listener.on_start_game(self.room_id, now);
    }

    fn broadcast_frames(&mut self, now: i64) {
        let frame_count = self.lockstep.frame_count();
        let pending = frame_count.saturating_sub(self.last_broadcast_frame);
        if !self.dirty && pending < self.config.broadcast_offset_frames {
            return;
        }
        self.dirty = false;
        self.last_broadcast_frame = frame_count;

        let threshold = self.config.bad_network_threshold_secs;
        for player in self.players.values_mut() {
            if !player.is_online() || !player.is_ready() || !player.is_responsive(now, threshold) {
                continue;
            }
            let frames = self.lockstep.snapshot(player.sent_frame(), frame_count);
            if frames.is_empty() {
                continue;
            }
            if send_frames(player, &frames, self.config.max_frames_per_message).is_ok() {
                player.set_sent_frame(frame_count);
            }
        }
    }

    fn broadcast(&self, packet: Packet, except: Option<PlayerId>) {
        for player in self.players.values() {
            if Some(player.id()) == except {
                continue;
            }
            let _ = player.send_message(packet.clone());
        }
    }

    fn transition(&mut self, to: GameState) -> bool {
        if to <= self.state {
            return false;
        }
        let from = self.state;
        self.state = to;
        debug!("Room {} {:?} -> {:?}", self.room_id, from, to);
        self.listener.on_state_changed(self.room_id, from, to);
        true
    }
}

fn encode<T: Serialize>(id: MessageId, message: &T) -> Option<Packet> {
    match Packet::with_message(id, message) {
        Ok(packet) => Some(packet),
        Err(e) => {
            error!("Failed to encode {:?}: {}", id, e);
            None
        }
    }
}

fn connect_ack(code: ErrorCode) -> Option<Packet> {
    encode(MessageId::Connect, &ConnectResponse::new(code))
}

/// Send frames in batches of at most `max_per_message`.
fn send_frames(player: &Player, frames: &[FrameData], max_per_message: usize) -> Result<(), ConnectionError> {
    for chunk in frames.chunks(max_per_message.max(1)) {
        send_batch(player, chunk)?;
    }
    Ok(())
}

/// Send one batch, halving it while it exceeds the packet size cap.
fn send_batch(player: &Player, frames: &[FrameData]) -> Result<(), ConnectionError> {
    let batch = FrameBatch {
        frames: frames.to_vec(),
    };
    let Some(packet) = encode(MessageId::Frame, &batch) else {
        return Ok(());
    };

    match player.send_message(packet) {
        Err(ConnectionError::Codec(CodecError::FrameTooLarge { .. })) if frames.len() > 1 => {
            let (head, tail) = frames.split_at(frames.len() / 2);
            send_batch(player, head)?;
            send_batch(player, tail)
        }
        result => result,
    }
}
