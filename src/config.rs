//! Server configuration
//!
//! Parsed from command line flags, each of which can also come from a
//! `ROOM_CHAT_*` environment variable.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::client::OverflowPolicy;

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8081";

/// Per-client outgoing queue capacity
pub const DEFAULT_OUTGOING_CAPACITY: usize = 10;

/// Channel buffer size for server commands
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

/// Default snapshot file for the file store
pub const DEFAULT_STORE_PATH: &str = "room_chat.json";

/// Store implementation to run with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StoreBackend {
    /// Nothing survives a restart
    #[default]
    Memory,
    /// JSON snapshot file at `--store-path`
    File,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "room-chat-server", version, about = "TCP room chat server")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "ROOM_CHAT_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,

    /// Store backend
    #[arg(long, env = "ROOM_CHAT_STORE", value_enum, default_value_t = StoreBackend::Memory)]
    pub store: StoreBackend,

    /// Snapshot file used by the file store
    #[arg(long, env = "ROOM_CHAT_STORE_PATH", default_value = DEFAULT_STORE_PATH)]
    pub store_path: PathBuf,

    /// Messages buffered per client before the overflow policy applies
    #[arg(long, env = "ROOM_CHAT_OUTGOING_CAPACITY", default_value_t = DEFAULT_OUTGOING_CAPACITY)]
    pub outgoing_capacity: usize,

    /// Commands buffered ahead of the command processor
    #[arg(long, env = "ROOM_CHAT_COMMAND_CAPACITY", default_value_t = DEFAULT_COMMAND_CAPACITY)]
    pub command_capacity: usize,

    /// What to do when a client's outgoing queue is full
    #[arg(long, env = "ROOM_CHAT_OVERFLOW", value_enum, default_value_t = OverflowPolicy::Disconnect)]
    pub overflow: OverflowPolicy,
}

impl Config {
    /// Outgoing queue capacity, at least 1
    pub fn outgoing_capacity(&self) -> usize {
        self.outgoing_capacity.max(1)
    }

    /// Command queue capacity, at least 1
    pub fn command_capacity(&self) -> usize {
        self.command_capacity.max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            store: StoreBackend::Memory,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            outgoing_capacity: DEFAULT_OUTGOING_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            overflow: OverflowPolicy::Disconnect,
        }
    }
}
