//! Room Actor
//!
//! One task per room owns the [`Game`] and is the only place it is
//! mutated. Connection hooks share one bounded inbox, so a connection's
//! join, messages and leave reach the game in the order they happened:
//!
//! ```text
//!  on_connect ─┐
//!  on_message ─┼──► inbox ──┐
//!  on_close   ─┘            ├──► actor loop ──► Game
//!  ticker / timers ─────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::{RoomConfig, RoomError};
use crate::core::{unix_now, PlayerId, RoomId};
use crate::game::{Game, GameEvent, GameListener, GameState};
use crate::network::{Connection, ConnectionCallback};
use crate::protocol::Packet;

/// Inbox capacity shared by joins, messages and leaves.
const INBOX_LIMIT: usize = 2048;

/// Room event channel capacity.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A message from a joined connection.
struct PlayerPacket {
    conn: Arc<Connection>,
    packet: Packet,
}

/// Handle to a running room.
pub struct Room {
    config: RoomConfig,
    roster: BTreeSet<PlayerId>,
    over: Arc<AtomicBool>,
    closed: AtomicBool,
    inbox: mpsc::Sender<RoomEvent>,
    stop_tx: watch::Sender<bool>,
    events: broadcast::Sender<GameEvent>,
}

impl Room {
    /// Validate the config and start the room actor.
    pub fn spawn(config: RoomConfig) -> Result<Arc<Room>, RoomError> {
        config.validate()?;

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_LIMIT);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let over = Arc::new(AtomicBool::new(false));

        let listener = RoomListener {
            over: over.clone(),
            events: events.clone(),
        };
        let game = Game::new(
            config.room_id,
            &config.players,
            config.random_seed,
            config.game.clone(),
            Box::new(listener),
            unix_now(),
        );

        let actor = RoomActor {
            room_id: config.room_id,
            game,
            over: over.clone(),
            events: events.clone(),
        };
        let inbox = Inbox {
            events: inbox_rx,
            stop: stop_rx,
        };
        tokio::spawn(actor.run(inbox, config.clone()));

        info!(
            "Room {} created with {} players at {} Hz",
            config.room_id,
            config.players.len(),
            config.tick_frequency_hz
        );

        Ok(Arc::new(Room {
            roster: config.players.iter().copied().collect(),
            config,
            over,
            closed: AtomicBool::new(false),
            inbox: inbox_tx,
            stop_tx,
            events,
        }))
    }

    /// Room id.
    pub fn id(&self) -> RoomId {
        self.config.room_id
    }

    /// Provisioning config.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// True once the game has announced game over. Never cleared.
    pub fn is_over(&self) -> bool {
        self.over.load(Ordering::Acquire)
    }

    /// True once `stop` has been called. Never cleared.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the player is on the roster.
    pub fn has_player(&self, player_id: PlayerId) -> bool {
        self.roster.contains(&player_id)
    }

    /// Whether the token matches the room secret.
    pub fn verify_token(&self, token: &str) -> bool {
        token == self.config.secret_key
    }

    /// Subscribe to room lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    /// Ask the actor to close every player and exit.
    pub fn stop(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_tx.send_replace(true);
        info!("Room {} stopping", self.config.room_id);
    }
}

#[async_trait]
impl ConnectionCallback for Room {
    async fn on_connect(&self, conn: &Arc<Connection>) -> bool {
        self.inbox.send(RoomEvent::Join(conn.clone())).await.is_ok()
    }

    async fn on_message(&self, conn: &Arc<Connection>, packet: Packet) -> bool {
        let message = PlayerPacket {
            conn: conn.clone(),
            packet,
        };
        self.inbox.send(RoomEvent::Message(message)).await.is_ok()
    }

    async fn on_close(&self, conn: &Arc<Connection>) {
        let _ = self.inbox.send(RoomEvent::Leave(conn.clone())).await;
    }
}

// =============================================================================
// ACTOR
// =============================================================================

struct Inbox {
    events: mpsc::Receiver<RoomEvent>,
    stop: watch::Receiver<bool>,
}

enum RoomEvent {
    Tick,
    Join(Arc<Connection>),
    Leave(Arc<Connection>),
    Message(PlayerPacket),
    EndingSoon(u64),
    TimeLimit,
}

struct RoomActor {
    room_id: RoomId,
    game: Game,
    over: Arc<AtomicBool>,
    events: broadcast::Sender<GameEvent>,
}

impl RoomActor {
    async fn run(mut self, mut inbox: Inbox, config: RoomConfig) {
        let mut ticker = interval(config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started = Instant::now();
        let (mut deadline, mut notify_at) = if config.time_limit_secs > 0 {
            let limit = Duration::from_secs(config.time_limit_secs);
            let notify = (config.notify_before_end_secs > 0)
                .then(|| started + limit.saturating_sub(Duration::from_secs(config.notify_before_end_secs)));
            (Some(started + limit), notify)
        } else {
            (None, None)
        };
        let remaining = config.notify_before_end_secs.min(config.time_limit_secs);

        loop {
            let event = tokio::select! {
                biased;
                _ = inbox.stop.changed() => break,
                _ = ticker.tick() => RoomEvent::Tick,
                _ = sleep_until(deadline.unwrap_or(started)), if deadline.is_some() => {
                    deadline = None;
                    RoomEvent::TimeLimit
                }
                _ = sleep_until(notify_at.unwrap_or(started)), if notify_at.is_some() => {
                    notify_at = None;
                    RoomEvent::EndingSoon(remaining)
                }
                Some(event) = inbox.events.recv() => event,
            };

            if catch_unwind(AssertUnwindSafe(|| self.handle(event))).is_err() {
                error!("Room {} faulted, shutting down", self.room_id);
                self.over.store(true, Ordering::Release);
                break;
            }
        }

        if catch_unwind(AssertUnwindSafe(|| self.game.close())).is_err() {
            error!("Room {} faulted while closing", self.room_id);
        }

        inbox.events.close();
        while let Ok(event) = inbox.events.try_recv() {
            if let RoomEvent::Join(conn) = event {
                conn.close();
            }
        }

        info!("Room {} stopped", self.room_id);
        let _ = self.events.send(GameEvent::Closed {
            room_id: self.room_id,
        });
    }

    fn handle(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Tick => {
                self.game.tick(unix_now());
            }
            RoomEvent::Join(conn) => self.on_join(conn),
            RoomEvent::Leave(conn) => {
                if let Some(player_id) = conn.player_id() {
                    self.game.leave_game(player_id, &conn);
                }
            }
            RoomEvent::Message(PlayerPacket { conn, packet }) => {
                let Some(player_id) = conn.player_id() else {
                    return;
                };
                let current = self
                    .game
                    .player(player_id)
                    .is_some_and(|player| player.holds(&conn));
                if current {
                    self.game.process_message(player_id, packet, unix_now());
                } else {
                    debug!("Room {} dropping message from stale {}", self.room_id, conn.id());
                }
            }
            RoomEvent::EndingSoon(remaining_secs) => {
                info!("Room {} ends in {}s", self.room_id, remaining_secs);
                let _ = self.events.send(GameEvent::EndingSoon {
                    room_id: self.room_id,
                    remaining_secs,
                });
            }
            RoomEvent::TimeLimit => {
                info!("Room {} reached its time limit", self.room_id);
                self.game.force_over();
            }
        }
    }

    fn on_join(&mut self, conn: Arc<Connection>) {
        let Some(binding) = conn.binding() else {
            warn!("Room {} got unauthenticated {}", self.room_id, conn.id());
            conn.close();
            return;
        };
        if binding.room_id != self.room_id {
            warn!("Room {} got {} bound to room {}", self.room_id, conn.id(), binding.room_id);
            conn.close();
            return;
        }

        if let Err(e) = self.game.join_game(binding.player_id, conn.clone(), unix_now()) {
            info!("Room {} refused player {}: {}", self.room_id, binding.player_id, e);
            conn.close();
        }
    }
}

/// Forwards game notifications to room state and subscribers.
struct RoomListener {
    over: Arc<AtomicBool>,
    events: broadcast::Sender<GameEvent>,
}

impl GameListener for RoomListener {
    fn on_join_game(&self, room_id: RoomId, player_id: PlayerId) {
        let _ = self.events.send(GameEvent::PlayerJoined { room_id, player_id });
    }

    fn on_start_game(&self, room_id: RoomId, start_time: i64) {
        let _ = self.events.send(GameEvent::GameStarted { room_id, start_time });
    }

    fn on_leave_game(&self, room_id: RoomId, player_id: PlayerId) {
        let _ = self.events.send(GameEvent::PlayerLeft { room_id, player_id });
    }

    fn on_game_over(&self, room_id: RoomId, results: &BTreeMap<PlayerId, PlayerId>) {
        self.over.store(true, Ordering::Release);
        let _ = self.events.send(GameEvent::GameOver {
            room_id,
            results: results.clone(),
        });
    }

    fn on_state_changed(&self, room_id: RoomId, from: GameState, to: GameState) {
        let _ = self.events.send(GameEvent::StateChanged { room_id, from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameConfig;
    use crate::network::connection::testing::{pipe, test_config, Recorder, TestClient};
    use crate::network::PlayerBinding;
    use crate::protocol::{ConnectResponse, ErrorCode, MessageId, StartNotice};

    async fn next_event<F>(events: &mut broadcast::Receiver<GameEvent>, matches: F) -> GameEvent
    where
        F: Fn(&GameEvent) -> bool,
    {
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for room event")
    }

    async fn join(room: &Arc<Room>, player_id: PlayerId) -> (Arc<Connection>, TestClient) {
        let (recorder, _messages) = Recorder::new(true);
        let (conn, mut client) = pipe(recorder, test_config(), 1 << 16).await;
        conn.bind(PlayerBinding {
            room_id: room.id(),
            player_id,
        });
        assert!(room.on_connect(&conn).await);

        let ack: ConnectResponse = client.recv_until(MessageId::Connect).await.decode().unwrap();
        assert_eq!(ack.error_code, ErrorCode::Ok);
        (conn, client)
    }

    #[tokio::test]
    async fn test_room_queries() {
        let room = Room::spawn(RoomConfig::new(1, vec![10, 20], "k")).unwrap();

        assert_eq!(room.id(), 1);
        assert!(room.has_player(10));
        assert!(!room.has_player(30));
        assert!(room.verify_token("k"));
        assert!(!room.verify_token("x"));
        assert!(!room.is_over());
        room.stop();
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        assert!(matches!(
            Room::spawn(RoomConfig::new(1, vec![], "k")),
            Err(RoomError::EmptyRoster(1))
        ));
    }

    #[tokio::test]
    async fn test_players_ready_start_game() {
        let room = Room::spawn(RoomConfig::new(1, vec![10, 20], "k")).unwrap();
        let mut events = room.subscribe_events();

        let (a, mut client_a) = join(&room, 10).await;
        let (b, mut client_b) = join(&room, 20).await;
        assert!(room.on_message(&a, Packet::empty(MessageId::Ready)).await);
        assert!(room.on_message(&b, Packet::empty(MessageId::Ready)).await);

        let started = next_event(&mut events, |e| matches!(e, GameEvent::GameStarted { .. })).await;
        let GameEvent::GameStarted { start_time, .. } = started else {
            unreachable!()
        };
        for client in [&mut client_a, &mut client_b] {
            let start: StartNotice = client.recv_until(MessageId::Start).await.decode().unwrap();
            assert_eq!(start.timestamp, start_time);
        }
        room.stop();
    }

    #[tokio::test]
    async fn test_message_queued_behind_join_is_applied() {
        let room = Room::spawn(RoomConfig::new(1, vec![10], "k")).unwrap();
        let mut events = room.subscribe_events();
        let (recorder, _messages) = Recorder::new(true);
        let (conn, mut client) = pipe(recorder, test_config(), 1 << 16).await;
        conn.bind(PlayerBinding {
            room_id: 1,
            player_id: 10,
        });

        // No wait for the connect ack: Ready is queued right behind the join.
        assert!(room.on_connect(&conn).await);
        assert!(room.on_message(&conn, Packet::empty(MessageId::Ready)).await);

        next_event(&mut events, |e| matches!(e, GameEvent::GameStarted { .. })).await;
        let ack: ConnectResponse = client.recv_until(MessageId::Connect).await.decode().unwrap();
        assert_eq!(ack.error_code, ErrorCode::Ok);
        client.recv_until(MessageId::Start).await;
        room.stop();
    }

    #[tokio::test]
    async fn test_unbound_join_is_closed() {
        let room = Room::spawn(RoomConfig::new(1, vec![10], "k")).unwrap();
        let (recorder, _messages) = Recorder::new(true);
        let (conn, _client) = pipe(recorder.clone(), test_config(), 4096).await;

        room.on_connect(&conn).await;
        recorder.wait_closes(1).await;
        assert!(conn.is_closed());
        room.stop();
    }

    #[tokio::test]
    async fn test_stale_connection_is_ignored() {
        let room = Room::spawn(RoomConfig::new(1, vec![10, 20], "k")).unwrap();

        let (first, _c1) = join(&room, 10).await;
        let (second, mut c2) = join(&room, 10).await;
        assert!(first.is_closed());
        assert_eq!(first.binding(), None);

        room.on_close(&first).await;
        room.on_message(&first, Packet::empty(MessageId::Heartbeat)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(room.on_message(&second, Packet::empty(MessageId::Heartbeat)).await);
        c2.recv_until(MessageId::Heartbeat).await;
        assert!(!second.is_closed());
        room.stop();
    }

    #[tokio::test]
    async fn test_stop_closes_players() {
        let room = Room::spawn(RoomConfig::new(1, vec![10], "k")).unwrap();
        let mut events = room.subscribe_events();
        let (conn, mut client) = join(&room, 10).await;

        room.stop();
        room.stop();
        assert!(room.is_closed());

        client.recv_until(MessageId::Close).await;
        next_event(&mut events, |e| matches!(e, GameEvent::Closed { .. })).await;
        assert!(conn.is_closed());
        assert!(!room.on_message(&conn, Packet::empty(MessageId::Heartbeat)).await);
    }

    #[tokio::test]
    async fn test_ready_timeout_without_players_ends_game() {
        let config = RoomConfig {
            game: GameConfig {
                ready_timeout_secs: 0,
                ..GameConfig::default()
            },
            ..RoomConfig::new(1, vec![10, 20], "k")
        };
        let room = Room::spawn(config).unwrap();
        let mut events = room.subscribe_events();

        next_event(&mut events, |e| matches!(e, GameEvent::GameOver { .. })).await;
        assert!(room.is_over());
        room.stop();
    }

    #[tokio::test]
    async fn test_time_limit_forces_game_over() {
        let config = RoomConfig {
            time_limit_secs: 1,
            notify_before_end_secs: 1,
            ..RoomConfig::new(1, vec![10], "k")
        };
        let room = Room::spawn(config).unwrap();
        let mut events = room.subscribe_events();

        let soon = next_event(&mut events, |e| matches!(e, GameEvent::EndingSoon { .. })).await;
        assert_eq!(soon, GameEvent::EndingSoon { room_id: 1, remaining_secs: 1 });
        assert!(!room.is_over());

        next_event(&mut events, |e| matches!(e, GameEvent::GameOver { .. })).await;
        assert!(room.is_over());
        room.stop();
    }
}
