//! Listener
//!
//! Accepts transport sessions and wraps each one in a [`Connection`]
//! wired to the configured callback. The transport is abstracted behind
//! [`Acceptor`]; TCP is provided, and a reliable-UDP session transport
//! plugs in the same way.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionCallback, ConnectionConfig};
use crate::protocol::PacketCodec;

/// Source of ordered, session-oriented byte streams.
#[async_trait]
pub trait Acceptor: Send {
    /// Stream type yielded per session.
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Wait for the next session. Returns the stream and a peer label.
    async fn accept(&mut self) -> io::Result<(Self::Stream, String)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, String)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr.to_string()))
    }
}

/// Accept loop.
pub struct Listener {
    callback: Arc<dyn ConnectionCallback>,
    config: ConnectionConfig,
    codec: PacketCodec,
}

impl Listener {
    /// Create a listener that opens connections with the given callback.
    pub fn new(callback: Arc<dyn ConnectionCallback>, config: ConnectionConfig, codec: PacketCodec) -> Self {
        Self {
            callback,
            config,
            codec,
        }
    }

    /// Accept sessions until shutdown is signalled.
    pub async fn run<A: Acceptor>(&self, mut acceptor: A, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                result = acceptor.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!("New session from {}", peer);
                            let callback = self.callback.clone();
                            let config = self.config;
                            let codec = self.codec;
                            tokio::spawn(async move {
                                Connection::open(stream, peer, config, codec, callback).await;
                            });
                        }
                        Err(e) => {
                            warn!("Accept error: {}", e);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Listener shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::testing::{Recorder, TestClient};
    use crate::protocol::{MessageId, Packet};
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    /// Hands out pre-made in-memory streams.
    struct ChannelAcceptor(mpsc::Receiver<DuplexStream>);

    #[async_trait]
    impl Acceptor for ChannelAcceptor {
        type Stream = DuplexStream;

        async fn accept(&mut self) -> io::Result<(DuplexStream, String)> {
            match self.0.recv().await {
                Some(stream) => Ok((stream, "memory".to_string())),
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn test_accepted_sessions_get_connections() {
        let (recorder, mut messages) = Recorder::new(true);
        let listener = Listener::new(recorder.clone(), ConnectionConfig::default(), PacketCodec::default());
        let (streams_tx, streams_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            listener.run(ChannelAcceptor(streams_rx), shutdown_rx).await;
        });

        let mut clients = Vec::new();
        for _ in 0..2 {
            let (client, server) = tokio::io::duplex(4096);
            streams_tx.send(server).await.unwrap();
            clients.push(TestClient::new(client));
        }
        for client in clients.iter_mut() {
            client.send(Packet::empty(MessageId::Heartbeat)).await;
        }

        for _ in 0..2 {
            let packet = messages.recv().await.unwrap();
            assert_eq!(packet.message_id(), Some(MessageId::Heartbeat));
        }
        assert_eq!(recorder.connects.load(std::sync::atomic::Ordering::SeqCst), 2);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_acceptor() {
        let mut listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (stream, peer) = Acceptor::accept(&mut listener).await.unwrap();
        let client = connect.await.unwrap();

        assert!(stream.nodelay().unwrap());
        assert_eq!(peer, client.local_addr().unwrap().to_string());
    }
}
