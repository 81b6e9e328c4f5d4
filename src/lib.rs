//! TCP Room Chat Server Library
//!
//! A TCP chat server with named rooms and a compact binary framing
//! protocol, built on tokio using the Actor pattern for state management.
//!
//! # Features
//! - Binary framing: 1 byte kind, 4 byte big-endian length, up to 1024 content bytes
//! - Room creation, joining, leaving and listing
//! - Chat broadcast to the other members of the sender's current room
//! - Remote-address identity with persisted users, rooms and messages
//! - Bounded per-client queues with a configurable overflow policy
//! - Graceful shutdown
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `CommandProcessor` is the central actor owning all client and room state
//! - Each connection has a read task and a write task communicating with it
//! - Connect and disconnect travel through the same command queue as room
//!   operations, so no locks are needed anywhere
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use room_chat::{Config, MemoryStore, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::new(Config::default(), Arc::new(MemoryStore::new()));
//!     let handle = server.handle();
//!
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         handle.stop();
//!     });
//!
//!     server.start().await.unwrap();
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod file_store;
pub mod handler;
pub mod message;
pub mod processor;
pub mod room;
pub mod server;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use client::{ClientSession, OverflowPolicy};
pub use config::{Config, StoreBackend};
pub use error::{ProtocolError, SendError, ServerError, StoreError};
pub use file_store::JsonFileStore;
pub use handler::{handle_connection, ConnectionContext};
pub use message::{Header, Message, MessageKind, MAX_PAYLOAD_SIZE};
pub use processor::{CommandProcessor, ServerCommand};
pub use room::{Room, RoomRegistry};
pub use server::{Server, ServerHandle, ServerState};
pub use store::{ChatRecord, MemoryStore, RoomRecord, Store, User};
pub use types::{ClientId, RoomId, UserId};
