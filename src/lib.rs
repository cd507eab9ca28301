//! Room-based TCP Chat Server Library
//!
//! A chat server speaking a length-prefixed JSON protocol over plain TCP,
//! built on tokio using the Actor pattern for state management.
//!
//! # Features
//! - Length-prefixed JSON framing (4-byte big-endian length, 1 MiB limit)
//! - Username authentication with uniqueness checks
//! - Room creation with 6-character codes
//! - Room joining by code, leaving, switching
//! - Real-time chat messaging with join/leave notifications
//! - Slow-client eviction through bounded outbound queues
//! - Graceful shutdown
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` is the central actor owning all connections and rooms
//! - Each connection has a read flow and a write task, joined only through
//!   the hub mailbox and its own outbound queue
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use room_chat::{ChatClient, ChatServer, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config { host: "127.0.0.1".into(), port: 0, ..Config::default() };
//!     let server = ChatServer::start(config).await?;
//!
//!     let mut alice = ChatClient::connect(server.local_addr(), "alice").await?;
//!     let room = alice.create_room("general").await?;
//!     println!("created {} ({})", room.name, room.code);
//!
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod peer;
pub mod protocol;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::{ChatClient, ChatEvent, RoomInfo};
pub use codec::{decode_frame, encode, MessageCodec, MAX_FRAME_LENGTH};
pub use config::Config;
pub use connection::{handle_connection, ConnectionLimits};
pub use error::{ClientError, ConnectionError, DeliveryError, HubError, ProtocolError};
pub use hub::{Action, Hub, HubHandle};
pub use protocol::{Message, MessageType, Payload, ServerResponsePayload};
pub use room::Room;
pub use server::{ChatServer, RunningServer};
pub use types::{ConnId, RoomCode};
