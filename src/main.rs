//! Room-based TCP Chat Server - Entry Point
//!
//! Parses the command line, starts the server and waits for Ctrl+C.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use room_chat::{ChatServer, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=room_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("room_chat=info")),
        )
        .init();

    let config = Config::parse();
    let server = ChatServer::start(config).await?;

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    server.stop().await;
    Ok(())
}
