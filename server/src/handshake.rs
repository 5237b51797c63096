//! Server side of the challenge/response handshake.
//!
//! ```text
//! S -> C: <nonce>
//! C -> S: <sha256(secret + nonce) as hex>
//! S -> C: OK | ERROR: Unauthorized client.
//! ```
//!
//! A failed handshake is never retried; the caller closes the connection.

use crate::error::HandshakeError;
use crate::session::{Session, SessionState};
use log::{debug, info, warn};
use std::time::Duration;

/// Runs the handshake on a freshly accepted session.
///
/// On success the session is `Authenticated` and its response clock has
/// been reset. On failure the session is left for the caller to release.
pub async fn perform(
    session: &Session,
    secret: &str,
    wait: Duration,
) -> Result<(), HandshakeError> {
    let nonce = shared::generate_nonce();
    session.write_line(&nonce).await?;
    session.advance(SessionState::Greeted)?;
    debug!("{}: challenge sent", session.name());

    let response = match tokio::time::timeout(wait, session.read_line()).await {
        Err(_) => return Err(HandshakeError::Timeout(wait)),
        Ok(result) => result?,
    };
    let response = match response {
        Some(line) if !line.trim().is_empty() => line,
        _ => return Err(HandshakeError::NoResponse),
    };

    if !shared::verify(&nonce, secret, &response) {
        warn!("{} ({}) failed authentication", session.name(), session.peer());
        session.write_line(shared::HANDSHAKE_UNAUTHORIZED).await?;
        return Err(HandshakeError::Rejected);
    }

    session.write_line(shared::HANDSHAKE_OK).await?;
    session.advance(SessionState::Authenticated)?;
    session.touch_response();
    info!("{} ({}) authenticated", session.name(), session.peer());
    Ok(())
}
