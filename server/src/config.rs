//! Server configuration.
//!
//! All values have defaults; a JSON file may override any subset of them and
//! command line flags override the file.

use crate::error::ServerError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the acceptor binds to.
    pub bind_addr: SocketAddr,
    /// Pre-shared secret for the challenge/response handshake.
    pub secret: String,
    /// Scheduler period.
    pub tick_interval_ms: u64,
    /// Maximum silence from a client before it is dropped.
    pub liveness_timeout_ms: u64,
    /// Bounded wait of one read in the session read loop.
    pub read_timeout_ms: u64,
    /// Bounded wait for the client's challenge response.
    pub handshake_timeout_ms: u64,
    pub outgoing_capacity: usize,
    pub incoming_capacity: usize,
    pub max_sessions: usize,
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], shared::DEFAULT_PORT)),
            secret: shared::DEFAULT_SECRET.to_string(),
            tick_interval_ms: 250,
            liveness_timeout_ms: 5_000,
            read_timeout_ms: 1_000,
            handshake_timeout_ms: 5_000,
            outgoing_capacity: 1024,
            incoming_capacity: 1024,
            max_sessions: 64,
            max_line_length: 8192,
        }
    }
}

impl ServerConfig {
    /// Reads a JSON configuration file and validates it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ServerError> {
        let config: ServerConfig =
            serde_json::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the scheduler and queues cannot work with.
    pub fn validate(&self) -> Result<(), ServerError> {
        let positive = [
            ("tick_interval_ms", self.tick_interval_ms as usize),
            ("liveness_timeout_ms", self.liveness_timeout_ms as usize),
            ("read_timeout_ms", self.read_timeout_ms as usize),
            ("handshake_timeout_ms", self.handshake_timeout_ms as usize),
            ("outgoing_capacity", self.outgoing_capacity),
            ("incoming_capacity", self.incoming_capacity),
            ("max_sessions", self.max_sessions),
            ("max_line_length", self.max_line_length),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ServerError::Config(format!("{} must be positive", name)));
            }
        }

        if self.liveness_timeout_ms <= self.tick_interval_ms {
            return Err(ServerError::Config(format!(
                "liveness_timeout_ms ({}) must exceed tick_interval_ms ({})",
                self.liveness_timeout_ms, self.tick_interval_ms
            )));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr.port(), shared::DEFAULT_PORT);
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ServerConfig::from_json_str(
            r#"{ "bind_addr": "0.0.0.0:7000", "liveness_timeout_ms": 3000 }"#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:7000".parse().unwrap());
        assert_eq!(config.liveness_timeout(), Duration::from_secs(3));
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.secret, shared::DEFAULT_SECRET);
    }

    #[test]
    fn test_rejects_zero_values() {
        let err = ServerConfig::from_json_str(r#"{ "max_sessions": 0 }"#).unwrap_err();
        assert!(err.to_string().contains("max_sessions"));
    }

    #[test]
    fn test_rejects_timeout_shorter_than_tick() {
        let config = ServerConfig {
            tick_interval_ms: 500,
            liveness_timeout_ms: 400,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = ServerConfig::from_json_str("{ nope").unwrap_err();
        assert_eq!(err.as_label(), "server_config");
    }

    #[test]
    fn test_missing_file() {
        let err = ServerConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.as_label(), "server_config");
    }
}
