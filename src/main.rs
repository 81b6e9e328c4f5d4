//! TCP Room Chat Server - Entry Point
//!
//! Parses configuration, opens the store and runs the server until Ctrl-C.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use room_chat::{Config, JsonFileStore, MemoryStore, Server, Store, StoreBackend};

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
    let store = open_store(&config).await;

    let server = Server::new(config, store);
    let handle = server.handle();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                handle.stop();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.start().await?;
    Ok(())
}

/// Open the configured store, falling back to memory if the file store fails
async fn open_store(config: &Config) -> Arc<dyn Store> {
    match config.store {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => match JsonFileStore::open(&config.store_path).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(
                    "Failed to open store {}: {}, using in-memory store",
                    config.store_path.display(),
                    e
                );
                Arc::new(MemoryStore::new())
            }
        },
    }
}
