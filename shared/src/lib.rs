//! Protocol vocabulary shared by the line server and its clients.
//!
//! The wire protocol is strictly line-oriented UTF-8 text. Everything both
//! ends must agree on lives here: the handshake replies, the command tokens,
//! the object-sync markers, the challenge/response digest ([`auth`]) and the
//! positional game-object record format ([`objects`]).

pub mod auth;
pub mod objects;

pub use auth::{compute_response, generate_nonce, verify};
pub use objects::{GameObject, ObjectList, ObjectParseError, Quat, Vec3};

/// Port the server listens on when nothing else is configured.
pub const DEFAULT_PORT: u16 = 9998;

/// Pre-shared secret used when no other secret is configured.
pub const DEFAULT_SECRET: &str = "YourSuperSecretKey12345";

/// Reply sent after a client proves it holds the secret.
pub const HANDSHAKE_OK: &str = "OK";
/// Reply sent when the challenge response does not match.
pub const HANDSHAKE_UNAUTHORIZED: &str = "ERROR: Unauthorized client.";
/// Reply sent to an authenticated client when no session slot is free.
pub const SERVER_FULL: &str = "ERROR: Server full.";
pub const SHUTDOWN_NOTICE: &str = "Server shutting down.";

pub const QUIT_COMMAND: &str = "/quit";
pub const PING_COMMAND: &str = "/ping";
pub const GOODBYE_REPLY: &str = "Goodbye!";
pub const PONG_REPLY: &str = "Pong!";
pub const UNKNOWN_COMMAND_PREFIX: &str = "Unknown command:";

pub const CLIENT_OBJECT_LIST: &str = "INCOMING_CLIENT_OBJECT_LIST";
pub const SERVER_OBJECT_LIST: &str = "INCOMING_SERVER_OBJECT_LIST";
pub const REQUEST_SERVER_OBJECT_LIST: &str = "REQUEST_SERVER_OBJECT_LIST";
pub const END_OBJECT_LIST: &str = "END_OBJECT_LIST";

/// Formats the reply for a slash command the server does not know.
pub fn unknown_command_reply(token: &str) -> String {
    format!("{} {}", UNKNOWN_COMMAND_PREFIX, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command_reply() {
        assert_eq!(unknown_command_reply("/dance"), "Unknown command: /dance");
    }

    #[test]
    fn test_markers_are_single_tokens() {
        for marker in [
            CLIENT_OBJECT_LIST,
            SERVER_OBJECT_LIST,
            REQUEST_SERVER_OBJECT_LIST,
            END_OBJECT_LIST,
        ] {
            assert!(!marker.contains(char::is_whitespace));
            assert!(!marker.starts_with('/'));
        }
    }

    #[test]
    fn test_replies_fit_on_one_line() {
        for reply in [
            HANDSHAKE_OK,
            HANDSHAKE_UNAUTHORIZED,
            SERVER_FULL,
            GOODBYE_REPLY,
            PONG_REPLY,
        ] {
            assert!(!reply.contains('\n'));
        }
    }
}
