//! Room struct definition
//!
//! Represents a chat room: a code, a display name and a set of members.

use std::collections::HashSet;
use std::time::Instant;

use crate::types::{ConnId, RoomCode};

/// Chat Room
///
/// Owned by the hub, which is the only task that ever mutates it, so
/// the membership set needs no lock. A room is dropped by the hub as
/// soon as its last member leaves.
#[derive(Debug)]
pub struct Room {
    /// Room code for identification
    pub code: RoomCode,
    /// Human-chosen display name
    pub name: String,
    /// Current members
    members: HashSet<ConnId>,
    /// Room creation time
    pub created_at: Instant,
}

impl Room {
    /// Create a new, empty room
    pub fn new(code: RoomCode, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            members: HashSet::new(),
            created_at: Instant::now(),
        }
    }

    /// Add a member. Returns false if it was already present.
    pub fn add_member(&mut self, conn: ConnId) -> bool {
        self.members.insert(conn)
    }

    /// Remove a member. Removing an absent member is a no-op returning false.
    pub fn remove_member(&mut self, conn: ConnId) -> bool {
        self.members.remove(&conn)
    }

    /// Check if a connection is in this room
    pub fn contains(&self, conn: ConnId) -> bool {
        self.members.contains(&conn)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Snapshot of the current members
    pub fn members(&self) -> Vec<ConnId> {
        self.members.iter().copied().collect()
    }
}
