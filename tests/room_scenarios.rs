//! End-to-end room scenarios over loopback TCP.

mod common;

use std::time::Duration;

use tokio::sync::broadcast;

use common::{eventually, TestServer};
use lockstep_room::game::{GameConfig, GameEvent, GameState};
use lockstep_room::protocol::{ErrorCode, InputCommand, MessageId, Packet, ResultReport, StartNotice};
use lockstep_room::room::RoomConfig;

async fn next_event<F>(events: &mut broadcast::Receiver<GameEvent>, mut matches: F) -> GameEvent
where
    F: FnMut(&GameEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("event not observed")
}

fn input(sequence_id: u32) -> InputCommand {
    InputCommand {
        sequence_id,
        x: sequence_id as i32,
        y: -(sequence_id as i32),
    }
}

#[tokio::test]
async fn all_ready_starts_game_with_shared_timestamp() {
    let server = TestServer::start().await;
    let room = server
        .server
        .create_room(RoomConfig::new(1, vec![10, 20], "k"))
        .await
        .unwrap();
    let mut events = room.subscribe_events();

    let mut first = server.connect().await;
    let mut second = server.connect().await;
    assert_eq!(first.login(1, 10, "k").await, ErrorCode::Ok);
    assert_eq!(second.login(1, 20, "k").await, ErrorCode::Ok);

    first.send(Packet::empty(MessageId::Ready)).await;
    second.send(Packet::empty(MessageId::Ready)).await;

    let a: StartNotice = first.recv_until(MessageId::Start).await.decode().unwrap();
    let b: StartNotice = second.recv_until(MessageId::Start).await.decode().unwrap();
    assert_eq!(a.timestamp, b.timestamp);

    let started = next_event(&mut events, |e| matches!(e, GameEvent::GameStarted { .. })).await;
    assert_eq!(
        started,
        GameEvent::GameStarted {
            room_id: 1,
            start_time: a.timestamp
        }
    );
    assert_eq!(server.server.connection_count(), 2);

    server.stop().await;
}

#[tokio::test]
async fn bad_token_keeps_connection_open() {
    let server = TestServer::start().await;
    let room = server
        .server
        .create_room(RoomConfig::new(1, vec![10, 20], "k"))
        .await
        .unwrap();
    let mut events = room.subscribe_events();

    let mut client = server.connect().await;
    assert_eq!(client.login(1, 10, "x").await, ErrorCode::BadToken);

    client.send(Packet::empty(MessageId::Heartbeat)).await;
    assert_eq!(client.recv().await.unwrap().message_id(), Some(MessageId::Heartbeat));

    let joined = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            if let Ok(GameEvent::PlayerJoined { .. }) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(joined.is_err());

    // A correct retry on the same connection still works.
    assert_eq!(client.login(1, 10, "k").await, ErrorCode::Ok);

    server.stop().await;
}

#[tokio::test]
async fn reconnect_replays_frames_then_resumes_live() {
    let server = TestServer::start().await;
    let config = RoomConfig {
        tick_frequency_hz: 50,
        game: GameConfig {
            max_frames_per_message: 4,
            bad_network_threshold_secs: 60,
            ..GameConfig::default()
        },
        ..RoomConfig::new(1, vec![10, 20], "k")
    };
    let room = server.server.create_room(config).await.unwrap();
    let mut events = room.subscribe_events();

    let mut host = server.connect().await;
    let mut guest = server.connect().await;
    assert_eq!(host.login(1, 10, "k").await, ErrorCode::Ok);
    assert_eq!(guest.login(1, 20, "k").await, ErrorCode::Ok);
    host.send(Packet::empty(MessageId::Ready)).await;
    guest.send(Packet::empty(MessageId::Ready)).await;
    host.recv_until(MessageId::Start).await;
    guest.recv_until(MessageId::Start).await;

    host.send_message(MessageId::Input, &input(1)).await;
    loop {
        let batch = guest.recv_frames().await;
        if batch.frames.iter().flat_map(|f| &f.inputs).any(|i| i.sequence_id == 1) {
            break;
        }
    }

    drop(guest);
    next_event(&mut events, |e| matches!(e, GameEvent::PlayerLeft { player_id: 20, .. })).await;

    host.send_message(MessageId::Input, &input(2)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut guest = server.connect().await;
    assert_eq!(guest.login(1, 20, "k").await, ErrorCode::Ok);
    guest.send(Packet::empty(MessageId::Ready)).await;

    let first = guest.recv_frames().await;

    // The whole replay is queued by now, so this input can only arrive live.
    host.send_message(MessageId::Input, &input(3)).await;

    let mut seen = Vec::new();
    let mut last_id = None;
    let mut batch = first;
    loop {
        assert!(!batch.frames.is_empty());
        assert!(batch.frames.len() <= 4);
        for frame in &batch.frames {
            assert!(last_id.map_or(true, |last| frame.frame_id > last));
            last_id = Some(frame.frame_id);
            for data in &frame.inputs {
                assert_eq!(data.player_id, 10);
                assert_eq!(data.seat_index, 1);
                seen.push(data.sequence_id);
            }
        }
        if seen.contains(&3) {
            break;
        }
        batch = guest.recv_frames().await;
    }
    assert_eq!(seen, vec![1, 2, 3]);

    server.stop().await;
}

#[tokio::test]
async fn ready_timeout_with_nobody_online_ends_room() {
    let server = TestServer::start().await;
    let config = RoomConfig {
        game: GameConfig {
            ready_timeout_secs: 1,
            ..GameConfig::default()
        },
        ..RoomConfig::new(1, vec![10, 20], "k")
    };
    let room = server.server.create_room(config).await.unwrap();
    let mut events = room.subscribe_events();

    let changed = next_event(&mut events, |e| {
        matches!(e, GameEvent::StateChanged { .. } | GameEvent::GameStarted { .. })
    })
    .await;
    assert_eq!(
        changed,
        GameEvent::StateChanged {
            room_id: 1,
            from: GameState::Ready,
            to: GameState::Over
        }
    );
    next_event(&mut events, |e| matches!(e, GameEvent::GameOver { .. })).await;

    let registry = server.server.clone();
    eventually(move || registry.room_count() == 0).await;
    assert!(room.is_closed());

    server.stop().await;
}

#[tokio::test]
async fn declared_results_end_game_and_close_players() {
    let server = TestServer::start().await;
    server
        .server
        .create_room(RoomConfig::new(1, vec![10], "k"))
        .await
        .unwrap();

    let mut client = server.connect().await;
    assert_eq!(client.login(1, 10, "k").await, ErrorCode::Ok);
    client.send(Packet::empty(MessageId::Ready)).await;
    client.recv_until(MessageId::Start).await;

    client
        .send_message(MessageId::Result, &ResultReport { winner_id: 10 })
        .await;
    client.recv_until(MessageId::Result).await;
    client.recv_until(MessageId::Close).await;
    while client.recv().await.is_some() {}

    let registry = server.server.clone();
    eventually(move || registry.room_count() == 0 && registry.connection_count() == 0).await;

    server.stop().await;
}
