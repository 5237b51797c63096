//! TCP listener that turns accepted connections into admitted sessions.
//!
//! Every accepted connection gets its own task that runs the handshake, so a
//! slow client never holds up the accept loop. Connections that fail the
//! handshake are closed without ever reaching the registry or heartbeat.

use crate::error::ServerError;
use crate::handshake;
use crate::network::ServerContext;
use crate::session::{DisconnectReason, Session, SessionOptions};
use crate::supervisor::{ServiceTask, Subsystem};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

pub struct Acceptor {
    ctx: Arc<ServerContext>,
    task: ServiceTask,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Acceptor {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self {
            ctx,
            task: ServiceTask::default(),
            local_addr: Mutex::new(None),
        }
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait]
impl Subsystem for Acceptor {
    fn name(&self) -> &str {
        "Acceptor"
    }

    async fn start(self: Arc<Self>) -> Result<(), ServerError> {
        let addr = self.ctx.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let bound = listener.local_addr().map_err(|source| ServerError::Bind { addr, source })?;
        info!("Server listening on {}", bound);

        let ctx = Arc::clone(&self.ctx);
        self.task
            .spawn(self.name(), move |cancel| accept_loop(listener, ctx, cancel))?;
        *self.local_addr.lock() = Some(bound);
        Ok(())
    }

    async fn stop(self: Arc<Self>) -> Result<(), ServerError> {
        self.task.stop(self.name()).await?;
        *self.local_addr.lock() = None;
        Ok(())
    }
}

/// Accepts connections until cancelled.
///
/// Already admitted sessions are left running; only handshakes still in
/// progress are abandoned.
async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                info!("Accepted connection from {}", peer);
                tokio::spawn(admit(stream, peer, Arc::clone(&ctx), cancel.child_token()));
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    info!("Stopped accepting connections");
}

async fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
) {
    let session = match Session::new(stream, SessionOptions::from(&ctx.config)) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            warn!("Could not set up session for {}: {}", peer, e);
            return;
        }
    };

    let secret = ctx.config.secret.as_str();
    let wait = ctx.config.handshake_timeout();
    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Abandoning handshake with {}", peer);
            session.request_disconnect(DisconnectReason::Shutdown);
            session.release_transport().await;
            return;
        }
        outcome = handshake::perform(&session, secret, wait) => outcome,
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = ctx.admit(session).await {
                debug!("{} not admitted: {}", peer, e);
            }
        }
        Err(e) => {
            warn!("Handshake with {} failed [{}]: {}", peer, e.as_label(), e);
            session.request_disconnect(DisconnectReason::HandshakeFailed);
            session.release_transport().await;
        }
    }
}
