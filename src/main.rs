//! frameserve: demonstration server
//!
//! Boots a server from CLI/TOML configuration with the sample routes:
//! - kind 0: ping
//! - kind 1: echo

use frameserve::protocols::{echo, ping, EchoRouter, PingRouter};
use frameserve::{Config, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        name = %config.name,
        host = %config.host,
        port = config.port,
        max_packet_size = config.max_packet_size,
        max_connections = config.max_connections,
        workers = config.worker_pool_size,
        "Starting frameserve"
    );

    let mut server = Server::new(config);

    // A duplicate kind aborts startup here
    server.add_route(ping::KIND, PingRouter)?;
    server.add_route(echo::KIND, EchoRouter)?;

    server.set_on_connection_start(|conn| {
        info!(conn_id = conn.id(), peer = %conn.remote_addr(), "Client connected");
    });
    server.set_on_connection_stop(|conn| {
        let duration = chrono::Utc::now() - conn.connected_at();
        info!(
            conn_id = conn.id(),
            peer = %conn.remote_addr(),
            seconds = duration.num_seconds(),
            "Client disconnected"
        );
    });

    server.serve().await?;
    info!("Server stopped");
    Ok(())
}
