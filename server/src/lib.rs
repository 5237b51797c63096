//! # Line Session Server Library
//!
//! This library provides a stateful TCP session server for game-style
//! clients. Clients speak a newline-delimited UTF-8 text protocol, prove
//! they hold a pre-shared secret through a challenge/response handshake and
//! are then driven by a shared periodic tick that enforces liveness and
//! flushes their queued output.
//!
//! ## Core Responsibilities
//!
//! ### Session Lifecycle
//! Every connection becomes a [`Session`] that moves through
//! `New → Greeted → Authenticated → Disconnecting → Disconnected`. Any
//! number of concurrent disconnect requests converge on exactly one release
//! of the transport.
//!
//! ### Tick-Driven Delivery
//! The [`Heartbeat`] ticks every registered session at a fixed interval.
//! A tick drops sessions that have been silent for longer than the liveness
//! timeout and flushes everyone else's outgoing queue in FIFO order.
//!
//! ### Orchestration
//! The [`Supervisor`] starts the heartbeat and the acceptor as a unit and
//! stops them in reverse order. [`Server::shutdown`] additionally
//! disconnects every session.
//!
//! ## Module Organization
//!
//! - `acceptor`: TCP listener and per-connection handshake tasks
//! - `config`: [`ServerConfig`] defaults, JSON loading and validation
//! - `dispatch`: slash commands and the object-sync sub-protocol
//! - `error`: error enums for queues, sessions, handshakes and the server
//! - `game`: the shared world of game objects
//! - `handshake`: server side of the challenge/response exchange
//! - `heartbeat`: the fixed-interval scheduler and the `Tickable` seam
//! - `network`: the shared context and the [`Server`] facade
//! - `queue`: bounded line queues
//! - `registry`: the live set of authenticated sessions
//! - `session`: per-connection state, I/O loops and teardown
//! - `supervisor`: subsystem start/stop ordering and status

pub mod acceptor;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod game;
pub mod handshake;
pub mod heartbeat;
pub mod network;
pub mod queue;
pub mod registry;
pub mod session;
pub mod supervisor;

pub use config::ServerConfig;
pub use error::{HandshakeError, QueueError, ServerError, SessionError};
pub use heartbeat::{Heartbeat, TickOutcome, Tickable};
pub use network::{Server, ServerContext};
pub use registry::{SessionRegistry, SessionSummary};
pub use session::{DisconnectReason, Session, SessionState};
pub use supervisor::{ServiceStatus, Subsystem, Supervisor};
