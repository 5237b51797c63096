//! Server-side state for one client connection.
//!
//! A [`Session`] exclusively owns its transport, split into a line reader and
//! a line writer. Lines flow through two bounded queues:
//!
//! - the read loop pushes every non-blank line onto the incoming queue and
//!   refreshes the last-response time,
//! - any component may push onto the outgoing queue; the heartbeat drains it
//!   once per tick in [`Session::flush`].
//!
//! Disconnecting is two-phase. [`Session::request_disconnect`] is cheap,
//! idempotent and safe to call from anywhere: it records the first reason,
//! moves the state to `Disconnecting` and cancels the session's shutdown
//! scope. [`Session::release_transport`] runs once, after the session's own
//! loops have stopped, and closes the socket.

use crate::config::ServerConfig;
use crate::error::{QueueError, SessionError};
use crate::heartbeat::{TickError, TickOutcome, Tickable};
use crate::queue::MessageQueue;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Upper bound on the farewell flush performed while releasing the transport.
const FAREWELL_TIMEOUT: Duration = Duration::from_secs(1);

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type LineReader = FramedRead<BoxedReader, LinesCodec>;
type LineWriter = FramedWrite<BoxedWriter, LinesCodec>;

/// Authentication and teardown stage of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Greeted,
    Authenticated,
    Disconnecting,
    Disconnected,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (New, Greeted)
                | (Greeted, Authenticated)
                | (New | Greeted | Authenticated, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }

    /// True once a disconnect has been requested.
    pub fn is_closing(self) -> bool {
        matches!(self, SessionState::Disconnecting | SessionState::Disconnected)
    }
}

/// Why a session is going away. Only the first reason is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientQuit,
    RemoteClosed,
    Io,
    LivenessTimeout,
    HandshakeFailed,
    Unregistered,
    ServerFull,
    Shutdown,
}

impl DisconnectReason {
    /// Whether lines still queued for the client are worth sending on close.
    ///
    /// A client that timed out or dropped the socket receives nothing.
    pub fn sends_farewell(self) -> bool {
        matches!(
            self,
            DisconnectReason::ClientQuit
                | DisconnectReason::ServerFull
                | DisconnectReason::Shutdown
                | DisconnectReason::Unregistered
        )
    }

    pub fn as_label(self) -> &'static str {
        match self {
            DisconnectReason::ClientQuit => "client_quit",
            DisconnectReason::RemoteClosed => "remote_closed",
            DisconnectReason::Io => "io_error",
            DisconnectReason::LivenessTimeout => "liveness_timeout",
            DisconnectReason::HandshakeFailed => "handshake_failed",
            DisconnectReason::Unregistered => "unregistered",
            DisconnectReason::ServerFull => "server_full",
            DisconnectReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Per-session limits, taken from [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub liveness_timeout: Duration,
    pub read_timeout: Duration,
    pub outgoing_capacity: usize,
    pub incoming_capacity: usize,
    pub max_line_length: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for SessionOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            liveness_timeout: config.liveness_timeout(),
            read_timeout: config.read_timeout(),
            outgoing_capacity: config.outgoing_capacity,
            incoming_capacity: config.incoming_capacity,
            max_line_length: config.max_line_length,
        }
    }
}

pub struct Session {
    id: u64,
    guid: Uuid,
    name: String,
    peer: SocketAddr,
    options: SessionOptions,

    connected_at: Instant,
    last_response: Mutex<Instant>,
    last_tick: Mutex<Instant>,
    state: Mutex<SessionState>,

    outgoing: MessageQueue,
    incoming: MessageQueue,

    reader: tokio::sync::Mutex<Option<LineReader>>,
    writer: tokio::sync::Mutex<Option<LineWriter>>,

    disconnect_requested: AtomicBool,
    disconnected: AtomicBool,
    disconnect_reason: Mutex<Option<DisconnectReason>>,
    shutdown: CancellationToken,
}

impl Session {
    /// Wraps an accepted TCP stream.
    pub fn new(stream: TcpStream, options: SessionOptions) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self::from_parts(read_half, write_half, peer, options))
    }

    /// Builds a session over arbitrary byte-stream halves.
    pub fn from_parts<R, W>(reader: R, writer: W, peer: SocketAddr, options: SessionOptions) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let codec = LinesCodec::new_with_max_length(options.max_line_length);

        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);

        Self {
            id,
            guid: Uuid::new_v4(),
            name: format!("GameClient_{}", id),
            peer,
            connected_at: now,
            last_response: Mutex::new(now),
            last_tick: Mutex::new(now),
            state: Mutex::new(SessionState::New),
            outgoing: MessageQueue::new(options.outgoing_capacity),
            incoming: MessageQueue::new(options.incoming_capacity),
            reader: tokio::sync::Mutex::new(Some(FramedRead::new(reader, codec.clone()))),
            writer: tokio::sync::Mutex::new(Some(FramedWrite::new(writer, codec))),
            disconnect_requested: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            disconnect_reason: Mutex::new(None),
            shutdown: CancellationToken::new(),
            options,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn last_tick(&self) -> Instant {
        *self.last_tick.lock()
    }

    pub fn since_last_response(&self) -> Duration {
        self.last_response.lock().elapsed()
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        *self.disconnect_reason.lock()
    }

    pub fn is_disconnect_requested(&self) -> bool {
        self.disconnect_requested.load(Ordering::Acquire)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Resolves once a disconnect has been requested.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Moves to `next` if the state machine allows it.
    pub fn advance(&self, next: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        debug!("{}: {:?} -> {:?}", self.name, *state, next);
        *state = next;
        Ok(())
    }

    pub fn touch_response(&self) {
        *self.last_response.lock() = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn set_last_response(&self, at: Instant) {
        *self.last_response.lock() = at;
    }

    #[cfg(test)]
    pub(crate) fn inject_incoming(&self, line: &str) {
        self.receive(line.to_string());
    }

    /// Queues a line for the next flush. Never blocks.
    pub fn enqueue_outgoing(&self, line: impl Into<String>) -> Result<(), QueueError> {
        self.outgoing.push(line)
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    /// Pops the oldest received line without waiting.
    pub fn try_dequeue_incoming(&self) -> Option<String> {
        self.incoming.try_pop()
    }

    /// Waits for the next received line, or `None` once the session closes.
    ///
    /// Lines still queued when the disconnect is requested are not returned.
    pub async fn next_incoming(&self) -> Option<String> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            line = self.incoming.recv() => Some(line),
        }
    }

    /// Writes one line straight to the transport, bypassing the queue.
    ///
    /// Used by the handshake, which runs before the session is ticked.
    pub async fn write_line(&self, line: &str) -> Result<(), SessionError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::Closed)?;
        writer.send(line).await?;
        Ok(())
    }

    /// Reads one line straight from the transport. `Ok(None)` means EOF.
    ///
    /// Cancel safe, so callers may bound it with a timeout.
    pub async fn read_line(&self) -> Result<Option<String>, SessionError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(SessionError::Closed)?;
        match reader.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Drains the outgoing queue to the transport in FIFO order.
    ///
    /// A line leaves the queue only once the writer has accepted it, so a
    /// flush dropped part way (for example by the tick budget) resumes with
    /// the first unsent line on the next call. Lines queued while the flush
    /// runs wait for the next one.
    pub async fn flush(&self) -> Result<usize, SessionError> {
        let mut guard = self.writer.lock().await;
        let pending = self.outgoing.len();
        if pending == 0 {
            return Ok(0);
        }
        let writer = guard.as_mut().ok_or(SessionError::Closed)?;

        let mut sent = 0;
        while sent < pending {
            let Some(line) = self.outgoing.peek() else {
                break;
            };
            writer.feed(line).await?;
            self.outgoing.try_pop();
            sent += 1;
        }
        SinkExt::<String>::flush(writer).await?;
        Ok(sent)
    }

    /// Reads lines until the session closes or the transport fails.
    ///
    /// Each read waits at most `read_timeout`, so cancellation is observed
    /// even while the client is silent.
    pub async fn read_loop(&self) {
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return;
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = tokio::time::timeout(self.options.read_timeout, reader.next()) => next,
            };

            match next {
                Err(_elapsed) => continue,
                Ok(None) => {
                    debug!("{}: remote closed the connection", self.name);
                    self.request_disconnect(DisconnectReason::RemoteClosed);
                    break;
                }
                Ok(Some(Err(e))) => {
                    let e = SessionError::from(e);
                    warn!("{}: read failed ({}): {}", self.name, e.as_label(), e);
                    self.request_disconnect(DisconnectReason::Io);
                    break;
                }
                Ok(Some(Ok(line))) => self.receive(line),
            }
        }
    }

    fn receive(&self, line: String) {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return;
        }
        self.touch_response();
        if let Err(e) = self.incoming.push(line) {
            warn!("{}: dropping incoming line ({})", self.name, e);
        }
    }

    /// Requests a disconnect. Returns true only for the first request.
    ///
    /// The reason is recorded before the request becomes visible, so
    /// `release_transport` always sees the winning reason.
    pub fn request_disconnect(&self, reason: DisconnectReason) -> bool {
        {
            let mut slot = self.disconnect_reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
            self.disconnect_requested.store(true, Ordering::Release);
        }
        {
            let mut state = self.state.lock();
            if state.can_transition_to(SessionState::Disconnecting) {
                *state = SessionState::Disconnecting;
            }
        }
        info!("{} ({}) disconnect requested: {}", self.name, self.peer, reason);
        self.shutdown.cancel();
        true
    }

    /// Closes the transport. Returns true only for the call that released it.
    pub async fn release_transport(&self) -> bool {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.request_disconnect(DisconnectReason::Shutdown);
        let reason = self.disconnect_reason().unwrap_or(DisconnectReason::Shutdown);

        let writer = self.writer.lock().await.take();
        let pending = self.outgoing.drain();
        if let Some(mut writer) = writer {
            let farewell = reason.sends_farewell().then_some(pending).unwrap_or_default();
            let close = async {
                for line in farewell {
                    writer.feed(line).await?;
                }
                SinkExt::<String>::flush(&mut writer).await?;
                writer.get_mut().shutdown().await?;
                Ok::<(), SessionError>(())
            };
            match tokio::time::timeout(FAREWELL_TIMEOUT, close).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("{}: close failed: {}", self.name, e),
                Err(_) => debug!("{}: close timed out", self.name),
            }
        }
        self.reader.lock().await.take();

        *self.state.lock() = SessionState::Disconnected;
        info!(
            "{} ({}) disconnected after {:.1}s: {}",
            self.name,
            self.peer,
            self.connected_at.elapsed().as_secs_f32(),
            reason
        );
        true
    }

    fn mark_tick(&self) {
        *self.last_tick.lock() = Instant::now();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("guid", &self.guid)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl Tickable for Session {
    fn tick_id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    /// Liveness check, then flush.
    async fn tick(&self) -> Result<TickOutcome, TickError> {
        if self.is_disconnect_requested() {
            return Ok(TickOutcome::Retire);
        }
        self.mark_tick();

        let idle = self.since_last_response();
        if idle > self.options.liveness_timeout {
            info!("{}: no response for {:.1}s", self.name, idle.as_secs_f32());
            self.request_disconnect(DisconnectReason::LivenessTimeout);
            return Ok(TickOutcome::Retire);
        }

        match self.flush().await {
            Ok(_) => Ok(TickOutcome::Continue),
            Err(e) => {
                if e.is_transport() {
                    self.request_disconnect(DisconnectReason::Io);
                }
                Err(e.into())
            }
        }
    }

    fn on_unregistered(&self) {
        self.request_disconnect(DisconnectReason::Unregistered);
    }
}
