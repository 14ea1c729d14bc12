//! Shared helpers for end-to-end room tests.
//!
//! Spins a [`GameServer`] on an ephemeral loopback port and talks to it
//! through a framed TCP [`Client`].

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use lockstep_room::network::{GameServer, GameServerError, ServerConfig};
use lockstep_room::protocol::{ConnectRequest, ConnectResponse, ErrorCode, FrameBatch, MessageId, Packet, PacketCodec};

/// A server serving on loopback.
pub struct TestServer {
    pub server: Arc<GameServer>,
    pub addr: SocketAddr,
    task: JoinHandle<Result<(), GameServerError>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(ServerConfig {
            sweep_interval: Duration::from_millis(50),
            ..ServerConfig::default()
        }));

        let serving = server.clone();
        let task = tokio::spawn(async move { serving.serve(listener).await });
        Self { server, addr, task }
    }

    pub async fn connect(&self) -> Client {
        Client::connect(self.addr).await
    }

    pub async fn stop(self) {
        self.server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

/// Framed client over TCP.
pub struct Client {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    codec: PacketCodec,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        stream.set_nodelay(true).unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer,
            codec: PacketCodec::default(),
        }
    }

    pub async fn send(&mut self, packet: Packet) {
        let frame = self.codec.encode(&packet).unwrap();
        self.writer.write_all(&frame).await.unwrap();
    }

    pub async fn send_message<T: serde::Serialize>(&mut self, id: MessageId, message: &T) {
        self.send(Packet::with_message(id, message).unwrap()).await;
    }

    /// Next packet, or `None` once the server hung up.
    pub async fn recv(&mut self) -> Option<Packet> {
        let decode = self.codec.decode(&mut self.reader);
        match tokio::time::timeout(Duration::from_secs(5), decode).await {
            Ok(Ok(packet)) => Some(packet),
            Ok(Err(_)) => None,
            Err(_) => panic!("timed out waiting for a packet"),
        }
    }

    /// Skip packets until one with the given id arrives.
    pub async fn recv_until(&mut self, id: MessageId) -> Packet {
        loop {
            match self.recv().await {
                Some(packet) if packet.message_id() == Some(id) => return packet,
                Some(_) => continue,
                None => panic!("connection closed while waiting for {:?}", id),
            }
        }
    }

    /// Next frame batch, skipping anything else.
    pub async fn recv_frames(&mut self) -> FrameBatch {
        self.recv_until(MessageId::Frame).await.decode().unwrap()
    }

    /// True if nothing arrives within `wait`.
    pub async fn is_silent(&mut self, wait: Duration) -> bool {
        let decode = self.codec.decode(&mut self.reader);
        tokio::time::timeout(wait, decode).await.is_err()
    }

    /// Authenticate and return the connect ack code.
    pub async fn login(&mut self, room_id: u64, player_id: u64, token: &str) -> ErrorCode {
        let request = ConnectRequest {
            room_id,
            player_id,
            token: token.to_string(),
        };
        self.send_message(MessageId::Connect, &request).await;
        let reply: ConnectResponse = self.recv_until(MessageId::Connect).await.decode().unwrap();
        reply.error_code
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}
