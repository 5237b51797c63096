//! The live set of authenticated sessions.
//!
//! This module tracks every session that passed the handshake, including:
//! - Admission against the `max_sessions` capacity limit
//! - Point-in-time snapshots for iteration while sessions come and go
//! - Broadcast of a line to every connected client
//! - Summaries of connected clients for periodic logging
//!
//! The map is only ever mutated through `add` and `remove`; callers that
//! iterate always work on a snapshot.

use crate::error::ServerError;
use crate::session::{DisconnectReason, Session};
use log::{info, warn};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One connected client as shown in status logs.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: u64,
    pub guid: Uuid,
    pub name: String,
    pub peer: SocketAddr,
    pub connected_for: Duration,
    pub idle_for: Duration,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} connected {:.0}s, idle {:.1}s",
            self.name,
            self.guid,
            self.peer,
            self.connected_for.as_secs_f32(),
            self.idle_for.as_secs_f32()
        )
    }
}

/// Concurrent map from session id to session
///
/// Enforces the server's capacity limit on admission and hands out
/// snapshots so the heartbeat, broadcast and shutdown paths never hold the
/// lock while they work on sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    /// Adds a session if there is room for it
    ///
    /// Returns `Ok(false)` if a session with the same id is already present
    /// and `ServerError::RegistryFull` when the capacity limit is reached.
    pub async fn add(&self, session: Arc<Session>) -> Result<bool, ServerError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id()) {
            return Ok(false);
        }
        if sessions.len() >= self.max_sessions {
            return Err(ServerError::RegistryFull {
                capacity: self.max_sessions,
            });
        }

        info!(
            "{} ({}) joined. Connected clients: {}/{}",
            session.name(),
            session.peer(),
            sessions.len() + 1,
            self.max_sessions
        );
        sessions.insert(session.id(), session);
        Ok(true)
    }

    pub async fn remove(&self, id: u64) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&id);
        if let Some(session) = &removed {
            info!(
                "{} left. Connected clients: {}/{}",
                session.name(),
                sessions.len(),
                self.max_sessions
            );
        }
        removed
    }

    pub async fn get(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Point-in-time copy of the registered sessions, sorted by id.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.id());
        sessions
    }

    /// Queues `line` for every registered session
    ///
    /// Returns how many sessions accepted it. A session whose outgoing queue
    /// is full misses the line; the others are unaffected.
    pub async fn broadcast(&self, line: &str) -> usize {
        let mut delivered = 0;
        for session in self.snapshot().await {
            match session.enqueue_outgoing(line) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Broadcast skipped {}: {}", session.name(), e),
            }
        }
        delivered
    }

    pub async fn summaries(&self) -> Vec<SessionSummary> {
        self.snapshot()
            .await
            .iter()
            .map(|s| SessionSummary {
                id: s.id(),
                guid: s.guid(),
                name: s.name().to_string(),
                peer: s.peer(),
                connected_for: s.connected_at().elapsed(),
                idle_for: s.since_last_response(),
            })
            .collect()
    }

    /// Requests a disconnect of every registered session
    ///
    /// On shutdown each client is first sent a notice, delivered by the
    /// farewell flush when its transport is released. Sessions stay
    /// registered until their own driver has cleaned them up; await
    /// `wait_until_empty` for that.
    pub async fn disconnect_all(&self, reason: DisconnectReason) -> usize {
        let mut requested = 0;
        for session in self.snapshot().await {
            if session.is_disconnect_requested() {
                continue;
            }
            if reason == DisconnectReason::Shutdown {
                if let Err(e) = session.enqueue_outgoing(shared::SHUTDOWN_NOTICE) {
                    warn!("Shutdown notice skipped {}: {}", session.name(), e);
                }
            }
            if session.request_disconnect(reason) {
                requested += 1;
            }
        }
        requested
    }

    /// Waits until every session has been removed. Returns false on timeout.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_empty().await {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOptions;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};

    fn session() -> (Arc<Session>, DuplexStream) {
        let (server_side, client_side) = duplex(4096);
        let (reader, writer) = tokio::io::split(server_side);
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let session = Session::from_parts(reader, writer, peer, SessionOptions::default());
        (Arc::new(session), client_side)
    }

    #[tokio::test]
    async fn test_add_remove_and_duplicates() {
        let registry = SessionRegistry::new(4);
        let (a, _ca) = session();

        assert!(registry.add(a.clone()).await.unwrap());
        assert!(!registry.add(a.clone()).await.unwrap());
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(a.id()).await.is_some());

        assert!(registry.remove(a.id()).await.is_some());
        assert!(registry.remove(a.id()).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let registry = SessionRegistry::new(1);
        let (a, _ca) = session();
        let (b, _cb) = session();

        registry.add(a).await.unwrap();
        let err = registry.add(b).await.unwrap_err();
        assert!(matches!(err, ServerError::RegistryFull { capacity: 1 }));
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = SessionRegistry::new(4);
        let (a, _ca) = session();
        let (b, _cb) = session();
        registry.add(a.clone()).await.unwrap();
        registry.add(b.clone()).await.unwrap();

        let snapshot = registry.snapshot().await;
        registry.remove(a.id()).await;

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[0].id() < snapshot[1].id());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session() {
        let registry = SessionRegistry::new(4);
        let (a, ca) = session();
        let (b, cb) = session();
        registry.add(a.clone()).await.unwrap();
        registry.add(b.clone()).await.unwrap();

        assert_eq!(registry.broadcast("hello all").await, 2);
        a.flush().await.unwrap();
        b.flush().await.unwrap();

        for client in [ca, cb] {
            let mut lines = BufReader::new(client).lines();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "hello all");
        }
    }

    #[tokio::test]
    async fn test_summaries() {
        let registry = SessionRegistry::new(4);
        let (a, _ca) = session();
        registry.add(a.clone()).await.unwrap();

        let summaries = registry.summaries().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].guid, a.guid());
        assert!(summaries[0].to_string().starts_with(a.name()));
    }

    #[tokio::test]
    async fn test_disconnect_all_requests_each_once() {
        let registry = SessionRegistry::new(4);
        let (a, _ca) = session();
        let (b, _cb) = session();
        registry.add(a.clone()).await.unwrap();
        registry.add(b.clone()).await.unwrap();

        assert_eq!(registry.disconnect_all(DisconnectReason::Shutdown).await, 2);
        assert_eq!(registry.disconnect_all(DisconnectReason::Shutdown).await, 0);
        assert!(a.is_disconnect_requested());
        assert_eq!(a.disconnect_reason(), Some(DisconnectReason::Shutdown));
        assert_eq!(b.outgoing_len(), 1);

        assert!(!registry.wait_until_empty(Duration::from_millis(30)).await);
        registry.remove(a.id()).await;
        registry.remove(b.id()).await;
        assert!(registry.wait_until_empty(Duration::from_millis(30)).await);
    }

    #[tokio::test]
    async fn test_full_queue_still_disconnects() {
        let registry = SessionRegistry::new(4);
        let (a, _ca) = session();
        registry.add(a.clone()).await.unwrap();
        while a.enqueue_outgoing("backlog").is_ok() {}
        let backlog = a.outgoing_len();

        assert_eq!(registry.disconnect_all(DisconnectReason::Shutdown).await, 1);
        assert_eq!(a.disconnect_reason(), Some(DisconnectReason::Shutdown));
        assert_eq!(a.outgoing_len(), backlog);
    }
}
