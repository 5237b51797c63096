//! Client network layer speaking the line protocol over TCP

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{GameObject, ObjectList};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// How long `quit` waits for the server to close the connection.
const QUIT_WAIT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),

    #[error("line framing failed: {0}")]
    Codec(String),

    #[error("server closed the connection")]
    Closed,

    #[error("server rejected the handshake: {0}")]
    Rejected(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

impl From<LinesCodecError> for ClientError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::Io(io) => ClientError::Io(io),
            other => ClientError::Codec(other.to_string()),
        }
    }
}

/// One connection to the line server
pub struct Client {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
    peer: SocketAddr,
}

impl Client {
    /// Opens a TCP connection. The handshake is not performed yet.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        debug!("Connected to {}", peer);

        Ok(Self {
            reader: FramedRead::new(read_half, LinesCodec::new()),
            writer: FramedWrite::new(write_half, LinesCodec::new()),
            peer,
        })
    }

    /// Connects and proves knowledge of `secret`.
    pub async fn connect_and_authenticate(
        addr: impl ToSocketAddrs,
        secret: &str,
    ) -> Result<Self, ClientError> {
        let mut client = Self::connect(addr).await?;
        client.handshake(secret).await?;
        Ok(client)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Answers the server's challenge
    ///
    /// Reads the nonce, replies with the digest of `secret` and the nonce
    /// and expects `OK` back. Any other reply is returned as `Rejected`.
    pub async fn handshake(&mut self, secret: &str) -> Result<(), ClientError> {
        let nonce = self.recv_line().await?.ok_or(ClientError::Closed)?;
        self.send_line(&shared::compute_response(secret, &nonce)).await?;

        let reply = self.recv_line().await?.ok_or(ClientError::Closed)?;
        if reply.trim() == shared::HANDSHAKE_OK {
            info!("Authenticated with {}", self.peer);
            Ok(())
        } else {
            Err(ClientError::Rejected(reply))
        }
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), ClientError> {
        self.writer.send(line).await?;
        Ok(())
    }

    /// Reads the next line. `Ok(None)` means the server closed the connection.
    pub async fn recv_line(&mut self) -> Result<Option<String>, ClientError> {
        match self.reader.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    pub async fn recv_line_timeout(
        &mut self,
        wait: Duration,
    ) -> Result<Option<String>, ClientError> {
        tokio::time::timeout(wait, self.recv_line())
            .await
            .map_err(|_| ClientError::Timeout(wait))?
    }

    /// Sends `/ping` and waits for `Pong!`, returning the round trip time.
    ///
    /// Lines that arrive before the pong are skipped.
    pub async fn ping(&mut self, wait: Duration) -> Result<Duration, ClientError> {
        let sent = Instant::now();
        self.send_line(shared::PING_COMMAND).await?;
        loop {
            let remaining = wait.saturating_sub(sent.elapsed());
            match self.recv_line_timeout(remaining).await? {
                Some(line) if line == shared::PONG_REPLY => return Ok(sent.elapsed()),
                Some(line) => debug!("Skipping {:?} while waiting for pong", line),
                None => return Err(ClientError::Closed),
            }
        }
    }

    /// Uploads `objects` as a list opened by `marker`.
    pub async fn send_object_list(
        &mut self,
        marker: &str,
        objects: &[GameObject],
    ) -> Result<(), ClientError> {
        for line in ObjectList::render(marker, objects) {
            self.writer.feed(line).await?;
        }
        SinkExt::<String>::flush(&mut self.writer).await?;
        Ok(())
    }

    /// Asks for the server's world and collects the list it sends back.
    pub async fn request_server_objects(
        &mut self,
        wait: Duration,
    ) -> Result<ObjectList, ClientError> {
        self.send_line(shared::REQUEST_SERVER_OBJECT_LIST).await?;

        let started = Instant::now();
        let mut in_list = false;
        let mut records = Vec::new();
        loop {
            let remaining = wait.saturating_sub(started.elapsed());
            let line = self
                .recv_line_timeout(remaining)
                .await?
                .ok_or(ClientError::Closed)?;
            match line.as_str() {
                shared::SERVER_OBJECT_LIST => in_list = true,
                shared::END_OBJECT_LIST if in_list => break,
                _ if in_list => records.push(line),
                _ => debug!("Skipping {:?} while waiting for objects", line),
            }
        }
        Ok(ObjectList::from_lines(records.iter().map(String::as_str)))
    }

    /// Sends `/quit` and returns every line received until the server
    /// closes the connection.
    pub async fn quit(mut self) -> Result<Vec<String>, ClientError> {
        self.send_line(shared::QUIT_COMMAND).await?;
        let mut received = Vec::new();
        while let Some(line) = self.recv_line_timeout(QUIT_WAIT).await? {
            received.push(line);
        }
        Ok(received)
    }

    /// Forwards stdin to the server and logs everything it sends back
    ///
    /// Sends `/ping` every `ping_every` to stay inside the server's liveness
    /// timeout. When `shutdown` resolves the client quits politely and waits
    /// for the server to close the connection.
    pub async fn run_interactive<F>(
        mut self,
        ping_every: Duration,
        shutdown: F,
    ) -> Result<(), ClientError>
    where
        F: Future<Output = ()>,
    {
        let mut stdin = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
        let mut stdin_open = true;
        let mut keepalive = interval(ping_every);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Leaving server...");
                    for line in self.quit().await? {
                        info!("< {}", line);
                    }
                    return Ok(());
                }
                _ = keepalive.tick() => {
                    self.send_line(shared::PING_COMMAND).await?;
                }
                line = stdin.next(), if stdin_open => match line {
                    Some(Ok(line)) => self.send_line(&line).await?,
                    Some(Err(e)) => warn!("Ignoring unreadable input: {}", e),
                    None => stdin_open = false,
                },
                line = self.reader.next() => match line {
                    Some(Ok(line)) if line == shared::PONG_REPLY => debug!("< {}", line),
                    Some(Ok(line)) => info!("< {}", line),
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        info!("Server closed the connection");
                        return Ok(());
                    }
                },
            }
        }
    }
}
