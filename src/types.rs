//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `ConnId`: UUID-based unique connection identifier
//! - `RoomCode`: 6-character `[A-Z0-9]` room code

use rand::Rng;
use uuid::Uuid;

/// Characters a room code is drawn from
const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a generated room code
pub const ROOM_CODE_LEN: usize = 6;

/// Unique connection identifier (newtype pattern)
///
/// Wraps a UUID v4 so the hub can key connections without holding
/// on to the socket itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub Uuid);

impl ConnId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room code (6-character uppercase alphanumeric)
///
/// Handed out when a room is created and required to join it.
/// Codes typed by users are normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(pub String);

impl RoomCode {
    /// Generate a new random room code
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..ROOM_CODE_LEN)
            .map(|_| char::from(ROOM_CODE_CHARSET[rng.gen_range(0..ROOM_CODE_CHARSET.len())]))
            .collect();
        Self(code)
    }

    /// Parse user input into a RoomCode (trims and converts to uppercase)
    pub fn parse(input: &str) -> Self {
        Self(input.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
