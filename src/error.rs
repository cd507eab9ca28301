//! Error types for the chat server
//!
//! Defines wire protocol errors, hub (domain) errors, connection handler
//! errors and client errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::protocol::MessageType;

/// Wire protocol errors
///
/// Always fatal to the connection that produced them, never to the hub.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Stream closed in the middle of a frame
    #[error("Truncated frame: {0} bytes left unread at end of stream")]
    Framing(usize),

    /// Declared frame length exceeds the configured maximum
    #[error("Message too large: {len} bytes (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    /// Malformed envelope or payload JSON
    #[error("Decoding error: {0}")]
    Decoding(#[source] serde_json::Error),

    /// Payload could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(#[source] serde_json::Error),

    /// Payload requested for a different message type
    #[error("Unexpected message type: expected {expected}, got {actual}")]
    UnexpectedType {
        expected: MessageType,
        actual: MessageType,
    },

    /// IO error while reading or writing frames
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hub errors
///
/// Domain rule violations are reported back to the requesting client as a
/// failed `ServerResponse`; the connection stays alive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// Username already registered by another connection
    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),

    /// Room not found with the given code
    #[error("Room '{0}' not found")]
    RoomNotFound(String),

    /// Client is not in any room
    #[error("You are not in a room")]
    NotInRoom,

    /// Room name missing or blank
    #[error("Room name cannot be empty")]
    InvalidRoomName,

    /// Hub task is gone (mailbox closed or reply dropped)
    #[error("Hub unavailable")]
    Unavailable,

    /// Hub did not answer within the request timeout
    #[error("Timed out waiting for the hub")]
    Timeout,
}

/// Connection handler errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Bad or missing `Auth` frame
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Hub(#[from] HubError),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client library errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server answered the request with `success: false`
    #[error("Server error: {0}")]
    Rejected(String),

    /// Server reply is missing data the request needs
    #[error("Malformed response: {0}")]
    MalformedResponse(&'static str),

    /// Chat or leave attempted without a current room
    #[error("Not in a room. Create or join one first")]
    NotInRoom,

    /// No response within the request timeout
    #[error("Timeout waiting for server response")]
    Timeout,

    /// Server closed the connection
    #[error("Disconnected from server")]
    Disconnected,
}

/// Outbound delivery errors
///
/// Occurs when the hub cannot hand a frame to a connection's queue
/// without blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Queue at capacity: the reader is too slow or stuck
    #[error("Outbound queue full")]
    QueueFull,

    /// The writer side has gone away
    #[error("Outbound queue closed")]
    QueueClosed,
}
