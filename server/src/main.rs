use clap::Parser;
use log::{error, info};
use server::{Server, ServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// How often the connected clients are written to the log.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Line session server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON configuration file; flags below override its values
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<IpAddr>,
    /// Server port to listen on
    #[clap(short, long)]
    port: Option<u16>,
    /// Heartbeat interval in milliseconds
    #[clap(long)]
    tick_ms: Option<u64>,
    /// Silence in milliseconds after which a client is dropped
    #[clap(long)]
    timeout_ms: Option<u64>,
    /// Pre-shared handshake secret
    #[clap(long)]
    secret: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, server::ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)?,
            None => ServerConfig::default(),
        };

        let host = self.host.unwrap_or_else(|| config.bind_addr.ip());
        let port = self.port.unwrap_or_else(|| config.bind_addr.port());
        config.bind_addr = SocketAddr::new(host, port);
        if let Some(tick_ms) = self.tick_ms {
            config.tick_interval_ms = tick_ms;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.liveness_timeout_ms = timeout_ms;
        }
        if let Some(secret) = self.secret {
            config.secret = secret;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    info!(
        "Starting server on {} (tick {}ms, liveness timeout {}ms, max {} clients)",
        config.bind_addr, config.tick_interval_ms, config.liveness_timeout_ms, config.max_sessions
    );

    let server = Arc::new(Server::new(config)?);
    let reporter = tokio::spawn(report_status(Arc::clone(&server)));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    };
    let result = server.run_until(shutdown).await;

    reporter.abort();
    result?;
    Ok(())
}

/// Logs the connected clients at a fixed interval.
async fn report_status(server: Arc<Server>) {
    let mut timer = interval(STATUS_INTERVAL);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    timer.tick().await;

    loop {
        timer.tick().await;
        let summaries = server.context().registry.summaries().await;
        info!(
            "{} clients connected, {} heartbeat ticks",
            summaries.len(),
            server.context().heartbeat.ticks()
        );
        for summary in summaries {
            info!("  {}", summary);
        }
    }
}
