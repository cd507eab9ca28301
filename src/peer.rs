//! Peer struct definition
//!
//! The hub's record of a registered connection: who it is, which room it
//! is in, and the sending half of its outbound queue.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DeliveryError;
use crate::types::{ConnId, RoomCode};

/// Registered connection information
///
/// The hub holds the only `Sender` of the outbound queue, so dropping a
/// `Peer` closes the queue, and that happens exactly once.
#[derive(Debug)]
pub struct Peer {
    /// Unique identifier for this connection
    pub id: ConnId,
    /// Username claimed at authentication
    pub username: String,
    /// Current room, if any (only the hub sets this)
    pub room: Option<RoomCode>,
    /// Hub → Connection frame queue
    outbound: mpsc::Sender<Bytes>,
}

impl Peer {
    pub fn new(id: ConnId, username: String, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            username,
            room: None,
            outbound,
        }
    }

    /// Queue an encoded frame without waiting
    ///
    /// Fails instead of blocking when the queue is at capacity.
    pub fn deliver(&self, frame: Bytes) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::QueueClosed,
        })
    }

    pub fn is_in_room(&self) -> bool {
        self.room.is_some()
    }
}
