//! Tessera relay server.
//!
//! Environment:
//! - `TESSERA_RELAY_ADDR`: bind address (default `127.0.0.1:9090`)
//! - `TESSERA_RELAY_CAPACITY`: change buffer per connection
//! - `RUST_LOG`: log filter

use tessera_collab::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let config = RelayConfig::from_env();
    log::info!(
        "Starting Tessera relay on {} (capacity {}, max {} connections)",
        config.bind_addr, config.channel_capacity, config.max_connections
    );
    let server = RelayServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            log::info!(
                "Shutting down after {} connections, {} messages",
                stats.total_connections, stats.total_messages
            );
        }
    }
    Ok(())
}
