//! # Line Client Library
//!
//! A headless client for the line session server. It performs the client
//! side of the challenge/response handshake, keeps the session alive with
//! periodic `/ping` commands and exchanges plain text lines with the
//! server.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::Client;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), client::ClientError> {
//! let mut client = Client::connect_and_authenticate("127.0.0.1:9998", shared::DEFAULT_SECRET).await?;
//! let rtt = client.ping(Duration::from_secs(1)).await?;
//! println!("round trip: {:?}", rtt);
//! let farewell = client.quit().await?;
//! assert_eq!(farewell, vec![shared::GOODBYE_REPLY.to_string()]);
//! # Ok(())
//! # }
//! ```

pub mod network;

pub use network::{Client, ClientError};
