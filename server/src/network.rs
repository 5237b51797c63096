//! Server wiring: the shared context and the `Server` facade
//!
//! `ServerContext` is built once and handed to every component that needs
//! the registry, the heartbeat or the world. `Server` owns the supervisor
//! that starts the heartbeat and the acceptor and adds the full shutdown
//! path on top of it.

use crate::acceptor::Acceptor;
use crate::config::ServerConfig;
use crate::dispatch::{dispatch_loop, Dispatcher};
use crate::error::ServerError;
use crate::game::GameWorld;
use crate::heartbeat::{Heartbeat, Tickable};
use crate::registry::SessionRegistry;
use crate::session::{DisconnectReason, Session};
use crate::supervisor::{ServiceStatus, Supervisor};
use log::{info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long `shutdown` waits for sessions to finish their cleanup.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything the server's components share
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub heartbeat: Arc<Heartbeat>,
    pub world: Arc<GameWorld>,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::new(config.max_sessions),
            heartbeat: Arc::new(Heartbeat::new(config.tick_interval())),
            world: Arc::new(GameWorld::new()),
            config,
        })
    }

    /// Registers an authenticated session and starts its background loops
    ///
    /// When the registry is full the client is told so and disconnected.
    /// Returns the handle of the task that drives the session until its
    /// cleanup is complete.
    pub async fn admit(
        self: &Arc<Self>,
        session: Arc<Session>,
    ) -> Result<JoinHandle<()>, ServerError> {
        if let Err(e) = self.registry.add(Arc::clone(&session)).await {
            warn!("Rejecting {} ({}): {}", session.name(), session.peer(), e);
            if let Err(e) = session.enqueue_outgoing(shared::SERVER_FULL) {
                warn!("Full notice skipped {}: {}", session.name(), e);
            }
            session.request_disconnect(DisconnectReason::ServerFull);
            session.release_transport().await;
            return Err(e);
        }

        let tickable: Arc<dyn Tickable> = session.clone();
        self.heartbeat.register(tickable).await;

        let ctx = Arc::clone(self);
        Ok(tokio::spawn(drive_session(ctx, session)))
    }
}

/// Runs the read loop and dispatch worker of one session, then cleans up.
///
/// Both loops end only once a disconnect has been requested, so this is the
/// single place where a session leaves the heartbeat and the registry and
/// its transport is released.
async fn drive_session(ctx: Arc<ServerContext>, session: Arc<Session>) {
    let dispatcher = Dispatcher::new(Arc::clone(&ctx.world));
    tokio::join!(
        session.read_loop(),
        dispatch_loop(Arc::clone(&session), dispatcher)
    );

    ctx.heartbeat.unregister(session.id()).await;
    ctx.registry.remove(session.id()).await;
    session.release_transport().await;
}

/// The session server
///
/// Start order is heartbeat then acceptor; the supervisor stops them in
/// reverse, so no connection is admitted after the heartbeat stopped.
pub struct Server {
    ctx: Arc<ServerContext>,
    acceptor: Arc<Acceptor>,
    supervisor: Supervisor,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let ctx = ServerContext::new(config);
        let acceptor = Arc::new(Acceptor::new(Arc::clone(&ctx)));
        let supervisor = Supervisor::new()
            .with(ctx.heartbeat.clone())
            .with(acceptor.clone());

        Ok(Self {
            ctx,
            acceptor,
            supervisor,
        })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn status(&self) -> ServiceStatus {
        self.supervisor.status()
    }

    /// Address the acceptor is bound to while the server runs.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.local_addr()
    }

    pub async fn start(&self) -> Result<(), ServerError> {
        self.supervisor.start().await
    }

    /// Stops accepting and ticking. Connected sessions are left open.
    pub async fn stop(&self) -> Result<(), ServerError> {
        self.supervisor.stop().await
    }

    /// Stops the subsystems, then disconnects every session and waits for
    /// their cleanup.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        let stopped = self.supervisor.stop().await;

        let requested = self
            .ctx
            .registry
            .disconnect_all(DisconnectReason::Shutdown)
            .await;
        if requested > 0 {
            info!("Disconnecting {} clients", requested);
        }
        if !self.ctx.registry.wait_until_empty(SHUTDOWN_GRACE).await {
            warn!(
                "{} sessions still open after {:?}",
                self.ctx.registry.len().await,
                SHUTDOWN_GRACE
            );
        }

        info!("Server shut down");
        stopped
    }

    /// Starts the server, waits for `signal`, then shuts down.
    pub async fn run_until<F>(&self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        self.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOptions;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    fn config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            tick_interval_ms: 20,
            liveness_timeout_ms: 2_000,
            max_sessions: 1,
            ..ServerConfig::default()
        }
    }

    fn session() -> (Arc<Session>, tokio::io::DuplexStream) {
        let (server_side, client_side) = duplex(4096);
        let (reader, writer) = tokio::io::split(server_side);
        let peer: SocketAddr = "127.0.0.1:40003".parse().unwrap();
        let session = Session::from_parts(reader, writer, peer, SessionOptions::default());
        (Arc::new(session), client_side)
    }

    #[tokio::test]
    async fn test_admit_registers_and_cleans_up() {
        let ctx = ServerContext::new(config());
        let (session, _client) = session();

        let driver = ctx.admit(Arc::clone(&session)).await.unwrap();
        assert!(ctx.registry.contains(session.id()).await);
        assert!(ctx.heartbeat.contains(session.id()).await);

        session.request_disconnect(DisconnectReason::Io);
        tokio::time::timeout(Duration::from_secs(2), driver)
            .await
            .unwrap()
            .unwrap();

        assert!(ctx.registry.is_empty().await);
        assert!(ctx.heartbeat.is_empty().await);
        assert!(session.is_disconnected());
    }

    #[tokio::test]
    async fn test_admit_rejects_when_full() {
        let ctx = ServerContext::new(config());
        let (first, _first_client) = session();
        let (second, second_client) = session();

        let _driver = ctx.admit(first).await.unwrap();
        let err = ctx.admit(Arc::clone(&second)).await.unwrap_err();
        assert!(matches!(err, ServerError::RegistryFull { .. }));
        assert!(second.is_disconnected());
        assert!(!ctx.heartbeat.contains(second.id()).await);

        let mut lines = BufReader::new(second_client).lines();
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some(shared::SERVER_FULL)
        );
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejection_with_full_queue_still_releases() {
        let ctx = ServerContext::new(config());
        let (first, _first_client) = session();
        let (second, _second_client) = session();
        while second.enqueue_outgoing("backlog").is_ok() {}

        let _driver = ctx.admit(first).await.unwrap();
        assert!(ctx.admit(Arc::clone(&second)).await.is_err());
        assert_eq!(second.disconnect_reason(), Some(DisconnectReason::ServerFull));
        assert!(second.is_disconnected());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = ServerConfig {
            tick_interval_ms: 0,
            ..config()
        };
        assert!(Server::new(config).is_err());
    }

    #[tokio::test]
    async fn test_start_stop_binds_and_releases() {
        let server = Server::new(config()).unwrap();
        assert_eq!(server.local_addr(), None);

        server.start().await.unwrap();
        assert_eq!(server.status(), ServiceStatus::Running);
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().await.unwrap();
        assert_eq!(server.status(), ServiceStatus::Stopped);
        assert_eq!(server.local_addr(), None);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_failure_rolls_back() {
        let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            bind_addr: blocker.local_addr().unwrap(),
            ..config()
        };
        let server = Server::new(config).unwrap();

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::StartFailed { .. }));
        assert_eq!(server.status(), ServiceStatus::Errored);
    }
}
