//! Connection
//!
//! One `Connection` per transport session. Three tasks bridge the byte
//! stream to typed packets:
//!
//! ```text
//!  transport ──► read loop ──► inbound queue ──► dispatch loop ──► callback
//!  transport ◄── write loop ◄── outbound queue ◄── send / try_send
//! ```
//!
//! A supervisor joins the three tasks and invokes `on_close` exactly once
//! after all of them have exited. Any loop exiting, for any reason,
//! closes the connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::core::{ConnectionId, PlayerId, RoomId};
use crate::protocol::{CodecError, Packet, PacketCodec};

/// Connection-level errors. All of them are terminal to the one connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Operation on a closed connection.
    #[error("Connection closed")]
    Closed,

    /// Non-blocking send found the outbound queue full.
    #[error("Send queue full")]
    WouldBlock,

    /// Blocking send exceeded its deadline.
    #[error("Write timed out")]
    WriteTimeout,

    /// No complete packet arrived within the read timeout.
    #[error("Read timed out")]
    ReadTimeout,

    /// Malformed or oversized frame.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-connection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Outbound queue capacity (packets).
    pub send_queue_limit: usize,
    /// Inbound queue capacity (packets).
    pub receive_queue_limit: usize,
    /// Maximum wait for one complete packet. Zero disables the timeout.
    pub read_timeout: Duration,
    /// Maximum time for one transport write. Zero disables the timeout.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_queue_limit: 1024,
            receive_queue_limit: 1024,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Identity attached to a connection once it authenticates into a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerBinding {
    /// Room the connection was forwarded to.
    pub room_id: RoomId,
    /// Authenticated player.
    pub player_id: PlayerId,
}

/// Connection lifecycle hooks.
#[async_trait]
pub trait ConnectionCallback: Send + Sync + 'static {
    /// Called once before any loop starts. Returning false tears the
    /// connection down without starting loops or calling `on_close`.
    async fn on_connect(&self, conn: &Arc<Connection>) -> bool;

    /// Called for each inbound packet, in wire order. Returning false
    /// closes the connection.
    async fn on_message(&self, conn: &Arc<Connection>, packet: Packet) -> bool;

    /// Called exactly once after all loops have exited.
    async fn on_close(&self, conn: &Arc<Connection>);
}

/// A framed, queued transport session.
pub struct Connection {
    id: ConnectionId,
    peer: String,
    codec: PacketCodec,
    config: ConnectionConfig,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    outbound: mpsc::Sender<Packet>,
    binding: RwLock<Option<PlayerBinding>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .field("binding", &self.binding())
            .finish()
    }
}

/// Closes the connection when a loop exits, including by panic.
struct CloseOnExit(Arc<Connection>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl Connection {
    /// Wrap a transport stream and start its loops.
    ///
    /// Runs `on_connect` first; if it refuses, the stream is dropped and the
    /// returned connection is already closed.
    pub async fn open<S>(
        stream: S,
        peer: impl Into<String>,
        config: ConnectionConfig,
        codec: PacketCodec,
        callback: Arc<dyn ConnectionCallback>,
    ) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.send_queue_limit.max(1));
        let (close_tx, _) = watch::channel(false);

        let conn = Arc::new(Connection {
            id: ConnectionId::next(),
            peer: peer.into(),
            codec,
            config,
            closed: AtomicBool::new(false),
            close_tx,
            outbound: outbound_tx,
            binding: RwLock::new(None),
        });

        if !callback.on_connect(&conn).await {
            debug!("{} from {} refused on connect", conn.id, conn.peer);
            conn.close();
            return conn;
        }

        debug!("{} opened from {}", conn.id, conn.peer);

        let (reader, writer) = tokio::io::split(stream);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.receive_queue_limit.max(1));

        let loops = [
            tokio::spawn(Self::read_loop(conn.clone(), reader, inbound_tx)),
            tokio::spawn(Self::write_loop(conn.clone(), writer, outbound_rx)),
            tokio::spawn(Self::dispatch_loop(conn.clone(), inbound_rx, callback.clone())),
        ];
        tokio::spawn(Self::supervise(conn.clone(), loops, callback));

        conn
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer label supplied by the acceptor.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the connection. Idempotent and safe from any task.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_tx.send_replace(true);
        debug!("{} closing", self.id);
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.close_tx.subscribe();
        loop {
            let closed = *rx.borrow_and_update();
            if closed || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Enqueue without waiting.
    pub fn try_send(&self, packet: Packet) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.codec.check(&packet)?;

        self.outbound.try_send(packet).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConnectionError::WouldBlock,
            mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    /// Enqueue, waiting up to `timeout` for queue space.
    /// A zero timeout behaves like [`Connection::try_send`].
    pub async fn send(&self, packet: Packet, timeout: Duration) -> Result<(), ConnectionError> {
        if timeout.is_zero() {
            return self.try_send(packet);
        }
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.codec.check(&packet)?;

        tokio::select! {
            biased;
            _ = self.closed() => Err(ConnectionError::Closed),
            result = self.outbound.send(packet) => result.map_err(|_| ConnectionError::Closed),
            _ = tokio::time::sleep(timeout) => Err(ConnectionError::WriteTimeout),
        }
    }

    /// Attach an authenticated identity.
    pub fn bind(&self, binding: PlayerBinding) {
        *self.binding.write().unwrap_or_else(PoisonError::into_inner) = Some(binding);
    }

    /// Detach the identity, returning the previous one.
    pub fn unbind(&self) -> Option<PlayerBinding> {
        self.binding
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Current identity, if authenticated.
    pub fn binding(&self) -> Option<PlayerBinding> {
        *self.binding.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Authenticated player id, if any.
    pub fn player_id(&self) -> Option<PlayerId> {
        self.binding().map(|b| b.player_id)
    }

    // =========================================================================
    // LOOPS
    // =========================================================================

    async fn read_loop<R>(conn: Arc<Connection>, mut reader: R, inbound: mpsc::Sender<Packet>)
    where
        R: AsyncRead + Unpin,
    {
        let _guard = CloseOnExit(conn.clone());

        loop {
            let result = tokio::select! {
                _ = conn.closed() => break,
                result = conn.read_packet(&mut reader) => result,
            };

            let packet = match result {
                Ok(packet) => packet,
                Err(ConnectionError::Codec(CodecError::Io(e)))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("{} disconnected", conn.id);
                    break;
                }
                Err(e) => {
                    debug!("{} read failed: {}", conn.id, e);
                    break;
                }
            };

            trace!("{} received message {}", conn.id, packet.raw_id());

            tokio::select! {
                _ = conn.closed() => break,
                result = inbound.send(packet) => {
                    if result.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn write_loop<W>(conn: Arc<Connection>, mut writer: W, mut outbound: mpsc::Receiver<Packet>)
    where
        W: AsyncWrite + Unpin,
    {
        let _guard = CloseOnExit(conn.clone());

        loop {
            let packet = tokio::select! {
                biased;
                packet = outbound.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
                _ = conn.closed() => break,
            };

            if let Err(e) = conn.write_packet(&mut writer, &packet).await {
                debug!("{} write failed: {}", conn.id, e);
                return;
            }
        }

        // Flush what was queued before the close.
        outbound.close();
        while let Ok(packet) = outbound.try_recv() {
            if conn.write_packet(&mut writer, &packet).await.is_err() {
                return;
            }
        }
        let _ = conn.with_write_timeout(writer.shutdown()).await;
    }

    async fn dispatch_loop(
        conn: Arc<Connection>,
        mut inbound: mpsc::Receiver<Packet>,
        callback: Arc<dyn ConnectionCallback>,
    ) {
        let _guard = CloseOnExit(conn.clone());

        loop {
            let packet = tokio::select! {
                biased;
                _ = conn.closed() => break,
                packet = inbound.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
            };

            let keep_open = tokio::select! {
                _ = conn.closed() => break,
                keep_open = callback.on_message(&conn, packet) => keep_open,
            };

            if !keep_open {
                debug!("{} rejected by callback", conn.id);
                break;
            }
        }
    }

    async fn supervise(
        conn: Arc<Connection>,
        loops: [JoinHandle<()>; 3],
        callback: Arc<dyn ConnectionCallback>,
    ) {
        for handle in loops {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("{} loop panicked: {}", conn.id, e);
                }
            }
        }

        conn.close();
        callback.on_close(&conn).await;
        debug!("{} closed", conn.id);
    }

    async fn read_packet<R>(&self, reader: &mut R) -> Result<Packet, ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let decode = self.codec.decode(reader);
        if self.config.read_timeout.is_zero() {
            return Ok(decode.await?);
        }
        match tokio::time::timeout(self.config.read_timeout, decode).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::ReadTimeout),
        }
    }

    async fn write_packet<W>(&self, writer: &mut W, packet: &Packet) -> Result<(), ConnectionError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = self.codec.encode(packet)?;
        self.with_write_timeout(async {
            writer.write_all(&frame).await?;
            writer.flush().await
        })
        .await
    }

    async fn with_write_timeout<F>(&self, io: F) -> Result<(), ConnectionError>
    where
        F: std::future::Future<Output = std::io::Result<()>>,
    {
        if self.config.write_timeout.is_zero() {
            return Ok(io.await?);
        }
        match tokio::time::timeout(self.config.write_timeout, io).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}
