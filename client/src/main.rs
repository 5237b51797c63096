use clap::Parser;
use client::Client;
use log::{error, info};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:9998")]
    server: String,

    /// Pre-shared handshake secret
    #[arg(long, default_value = shared::DEFAULT_SECRET)]
    secret: String,

    /// Keep-alive ping interval in milliseconds
    #[arg(short = 'p', long, default_value = "1000")]
    ping_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let client = Client::connect_and_authenticate(&args.server, &args.secret).await?;
    info!("Type lines to send them, /quit or Ctrl+C to leave");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };
    client
        .run_interactive(Duration::from_millis(args.ping_ms.max(1)), shutdown)
        .await?;

    Ok(())
}
