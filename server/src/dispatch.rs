//! Protocol handling for authenticated sessions.
//!
//! Each session gets one dispatch worker that consumes its incoming queue in
//! order. Replies are queued on the session and reach the client with the
//! next heartbeat flush.

use crate::game::GameWorld;
use crate::session::{DisconnectReason, Session};
use log::{debug, info, warn};
use shared::ObjectList;
use std::sync::Arc;

/// Slash commands a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Ping,
    Unknown(String),
}

impl Command {
    /// Parses a line starting with `/`. The first token is matched
    /// case-insensitively; anything else on the line is ignored.
    pub fn parse(line: &str) -> Option<Command> {
        let token = line.split_whitespace().next()?;
        if !token.starts_with('/') {
            return None;
        }

        let command = if token.eq_ignore_ascii_case(shared::QUIT_COMMAND) {
            Command::Quit
        } else if token.eq_ignore_ascii_case(shared::PING_COMMAND) {
            Command::Ping
        } else {
            Command::Unknown(token.to_string())
        };
        Some(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Client,
    Server,
}

/// What the worker should do after handling a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Per-session protocol state.
pub struct Dispatcher {
    world: Arc<GameWorld>,
    open_list: Option<(ListKind, Vec<String>)>,
}

impl Dispatcher {
    pub fn new(world: Arc<GameWorld>) -> Self {
        Self {
            world,
            open_list: None,
        }
    }

    pub fn handle_line(&mut self, session: &Session, line: &str) -> Flow {
        let line = line.trim();

        if let Some(command) = Command::parse(line) {
            return self.handle_command(session, command);
        }

        if line == shared::END_OBJECT_LIST {
            match self.open_list.take() {
                Some((kind, records)) => self.close_list(session, kind, records),
                None => debug!("{}: end of list without a list", session.name()),
            }
            return Flow::Continue;
        }
        if let Some((_, records)) = &mut self.open_list {
            records.push(line.to_string());
            return Flow::Continue;
        }

        match line {
            shared::CLIENT_OBJECT_LIST => self.open_list = Some((ListKind::Client, Vec::new())),
            shared::SERVER_OBJECT_LIST => self.open_list = Some((ListKind::Server, Vec::new())),
            shared::REQUEST_SERVER_OBJECT_LIST => {
                let objects = self.world.snapshot();
                for line in ObjectList::render(shared::SERVER_OBJECT_LIST, &objects) {
                    if let Err(e) = session.enqueue_outgoing(line) {
                        warn!("{}: object list truncated: {}", session.name(), e);
                        break;
                    }
                }
            }
            other => debug!("{}: ignoring message {:?}", session.name(), other),
        }
        Flow::Continue
    }

    fn handle_command(&mut self, session: &Session, command: Command) -> Flow {
        let (reply, flow) = match command {
            Command::Quit => (shared::GOODBYE_REPLY.to_string(), Flow::Stop),
            Command::Ping => (shared::PONG_REPLY.to_string(), Flow::Continue),
            Command::Unknown(token) => (shared::unknown_command_reply(&token), Flow::Continue),
        };

        if let Err(e) = session.enqueue_outgoing(reply) {
            warn!("{}: dropping reply: {}", session.name(), e);
        }
        if flow == Flow::Stop {
            session.request_disconnect(DisconnectReason::ClientQuit);
        }
        flow
    }

    fn close_list(&self, session: &Session, kind: ListKind, records: Vec<String>) {
        let list = ObjectList::from_lines(records.iter().map(String::as_str));
        for (line, error) in &list.rejected {
            warn!("{}: skipping object record {}: {}", session.name(), line, error);
        }

        match kind {
            ListKind::Client => info!(
                "{} reported {} objects",
                session.name(),
                list.objects.len()
            ),
            ListKind::Server => {
                info!(
                    "{} uploaded {} server objects",
                    session.name(),
                    list.objects.len()
                );
                self.world.replace_all(list.objects);
            }
        }
    }
}

/// Consumes the session's incoming queue until the session closes.
pub async fn dispatch_loop(session: Arc<Session>, mut dispatcher: Dispatcher) {
    while let Some(line) = session.next_incoming().await {
        if dispatcher.handle_line(&session, &line) == Flow::Stop {
            break;
        }
    }
    debug!("{}: dispatch stopped", session.name());
}
