//! Error types for the session server.
//!
//! Every enum exposes `as_label()`, a short stable snake_case label used in
//! log lines so failures can be grepped without parsing messages.

use crate::session::SessionState;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// A bounded queue refused an item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full ({capacity} items)")]
    Full { capacity: usize },
}

impl QueueError {
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::Full { .. } => "queue_full",
        }
    }
}

/// Failures local to one session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("line framing failed: {0}")]
    Codec(String),

    #[error("transport already released")]
    Closed,

    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

impl From<LinesCodecError> for SessionError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::Io(io) => SessionError::Io(io),
            other => SessionError::Codec(other.to_string()),
        }
    }
}

impl SessionError {
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionError::Io(_) => "session_io",
            SessionError::Codec(_) => "session_codec",
            SessionError::Closed => "session_closed",
            SessionError::InvalidTransition { .. } => "session_invalid_transition",
        }
    }

    /// True for failures that mean the peer is gone.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SessionError::Io(_) | SessionError::Codec(_) | SessionError::Closed
        )
    }
}

/// Reasons a handshake attempt ended without admitting the client.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("client closed the connection or sent an empty response")]
    NoResponse,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("response did not match the challenge")]
    Rejected,

    #[error("transport failed during handshake: {0}")]
    Transport(#[from] SessionError),
}

impl HandshakeError {
    pub fn as_label(&self) -> &'static str {
        match self {
            HandshakeError::NoResponse => "handshake_no_response",
            HandshakeError::Timeout(_) => "handshake_timeout",
            HandshakeError::Rejected => "handshake_rejected",
            HandshakeError::Transport(_) => "handshake_transport",
        }
    }
}

/// Errors raised by the server's subsystems and configuration.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error("{0} is not running")]
    NotRunning(String),

    #[error("operation not allowed in status {0:?}")]
    InvalidStatus(crate::supervisor::ServiceStatus),

    #[error("subsystems failed to start: {failed:?}")]
    StartFailed { failed: Vec<String> },

    #[error("subsystems failed to stop: {failed:?}")]
    StopFailed { failed: Vec<String> },

    #[error("{name} task ended abnormally: {reason}")]
    TaskFailed { name: String, reason: String },

    #[error("registry is full ({capacity} sessions)")]
    RegistryFull { capacity: usize },

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ServerError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ServerError::Bind { .. } => "server_bind",
            ServerError::Config(_) => "server_config",
            ServerError::AlreadyRunning(_) => "server_already_running",
            ServerError::NotRunning(_) => "server_not_running",
            ServerError::InvalidStatus(_) => "server_invalid_status",
            ServerError::StartFailed { .. } => "server_start_failed",
            ServerError::StopFailed { .. } => "server_stop_failed",
            ServerError::TaskFailed { .. } => "server_task_failed",
            ServerError::RegistryFull { .. } => "server_registry_full",
            ServerError::Session(_) => "server_session",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_io_maps_to_session_io() {
        let err: SessionError =
            LinesCodecError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).into();
        assert!(matches!(err, SessionError::Io(_)));
        assert!(err.is_transport());

        let err: SessionError = LinesCodecError::MaxLineLengthExceeded.into();
        assert_eq!(err.as_label(), "session_codec");
    }

    #[test]
    fn test_invalid_transition_is_not_transport() {
        let err = SessionError::InvalidTransition {
            from: SessionState::Disconnected,
            to: SessionState::Authenticated,
        };
        assert!(!err.is_transport());
        assert!(err.to_string().contains("Disconnected"));
    }

    #[test]
    fn test_labels() {
        assert_eq!(QueueError::Full { capacity: 1 }.as_label(), "queue_full");
        assert_eq!(HandshakeError::Rejected.as_label(), "handshake_rejected");
        assert_eq!(
            ServerError::StartFailed { failed: vec![] }.as_label(),
            "server_start_failed"
        );
    }
}
