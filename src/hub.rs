//! Hub actor implementation
//!
//! The central actor that owns all shared state: registered connections,
//! the username index and the rooms. Every state transition arrives as an
//! [`Action`] on one ordered mailbox, so no locks are needed and
//! concurrent requests are resolved in submission order.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::HubError;
use crate::peer::Peer;
use crate::protocol::{
    ChatMessagePayload, Payload, ServerResponsePayload, UserEventPayload, UserJoinedPayload,
    UserLeftPayload,
};
use crate::room::Room;
use crate::types::{ConnId, RoomCode};

/// Default bound on request/response waits
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Actions submitted to the Hub
#[derive(Debug)]
pub enum Action {
    /// Authenticated connection wants to join the hub
    Register {
        conn: ConnId,
        username: String,
        outbound: mpsc::Sender<Bytes>,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },
    /// Connection is gone (or too slow to keep)
    Unregister { conn: ConnId },
    /// Create a room and move into it
    CreateRoom { conn: ConnId, room_name: String },
    /// Join an existing room by code
    Join { conn: ConnId, room: String },
    /// Leave the current room
    Leave { conn: ConnId },
    /// Send chat text to the current room
    Broadcast { conn: ConnId, content: String },
}

/// Cloneable submission side of the hub mailbox
#[derive(Debug, Clone)]
pub struct HubHandle {
    actions: mpsc::UnboundedSender<Action>,
    request_timeout: Duration,
}

impl HubHandle {
    /// Register a connection and wait for the hub's verdict
    pub async fn register(
        &self,
        conn: ConnId,
        username: String,
        outbound: mpsc::Sender<Bytes>,
    ) -> Result<(), HubError> {
        let (respond_to, response) = oneshot::channel();
        self.submit(Action::Register {
            conn,
            username,
            outbound,
            respond_to,
        })?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HubError::Unavailable),
            Err(_) => Err(HubError::Timeout),
        }
    }

    pub fn unregister(&self, conn: ConnId) -> Result<(), HubError> {
        self.submit(Action::Unregister { conn })
    }

    pub fn create_room(&self, conn: ConnId, room_name: String) -> Result<(), HubError> {
        self.submit(Action::CreateRoom { conn, room_name })
    }

    pub fn join(&self, conn: ConnId, room: String) -> Result<(), HubError> {
        self.submit(Action::Join { conn, room })
    }

    pub fn leave(&self, conn: ConnId) -> Result<(), HubError> {
        self.submit(Action::Leave { conn })
    }

    pub fn broadcast(&self, conn: ConnId, content: String) -> Result<(), HubError> {
        self.submit(Action::Broadcast { conn, content })
    }

    /// Enqueue an action. Fails only when the hub task has exited.
    pub fn submit(&self, action: Action) -> Result<(), HubError> {
        self.actions
            .send(action)
            .map_err(|_| HubError::Unavailable)
    }
}

/// The Hub actor
///
/// Processes one action at a time. Actions the hub schedules for itself
/// (unregistering unresponsive members) go to `backlog`, which is drained
/// before the mailbox is read again.
pub struct Hub {
    /// Registered connections: ConnId -> Peer
    connections: HashMap<ConnId, Peer>,
    /// Username index: username -> ConnId
    users: HashMap<String, ConnId>,
    /// Live rooms: RoomCode -> Room
    rooms: HashMap<RoomCode, Room>,
    /// Action mailbox
    mailbox: mpsc::UnboundedReceiver<Action>,
    /// Self-scheduled actions
    backlog: VecDeque<Action>,
}

impl Hub {
    /// Create a hub and the handle used to talk to it
    pub fn new(request_timeout: Duration) -> (Self, HubHandle) {
        let (actions, mailbox) = mpsc::unbounded_channel();
        let hub = Self {
            connections: HashMap::new(),
            users: HashMap::new(),
            rooms: HashMap::new(),
            mailbox,
            backlog: VecDeque::new(),
        };
        let handle = HubHandle {
            actions,
            request_timeout,
        };
        (hub, handle)
    }

    /// Run the Hub event loop
    ///
    /// Runs until every `HubHandle` is dropped. Queued actions are drained
    /// before exit; peers still registered at that point are dropped,
    /// which closes their outbound queues.
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(action) = self.next_action().await {
            self.handle_action(action);
        }

        let remaining = self.connections.len();
        self.rooms.clear();
        self.users.clear();
        self.connections.clear();

        info!("Hub shutting down, closed {} connections", remaining);
    }

    async fn next_action(&mut self) -> Option<Action> {
        match self.backlog.pop_front() {
            Some(action) => Some(action),
            None => self.mailbox.recv().await,
        }
    }

    /// Process a single action
    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Register {
                conn,
                username,
                outbound,
                respond_to,
            } => {
                let result = self.handle_register(conn, username, outbound);
                let _ = respond_to.send(result);
            }
            Action::Unregister { conn } => self.handle_unregister(conn),
            Action::CreateRoom { conn, room_name } => self.handle_create_room(conn, room_name),
            Action::Join { conn, room } => self.handle_join(conn, room),
            Action::Leave { conn } => self.handle_leave(conn),
            Action::Broadcast { conn, content } => self.handle_broadcast(conn, content),
        }
    }

    /// Handle registration of an authenticated connection
    fn handle_register(
        &mut self,
        conn: ConnId,
        username: String,
        outbound: mpsc::Sender<Bytes>,
    ) -> Result<(), HubError> {
        if self.users.contains_key(&username) {
            warn!("Rejecting {}: username '{}' already registered", conn, username);
            return Err(HubError::DuplicateUsername(username));
        }

        self.users.insert(username.clone(), conn);
        self.connections
            .insert(conn, Peer::new(conn, username.clone(), outbound));

        info!("Registered {} as '{}'", conn, username);
        debug!(
            "Total connections: {}, Total rooms: {}",
            self.connections.len(),
            self.rooms.len()
        );

        self.reply(
            conn,
            ServerResponsePayload::ok(format!("Authenticated as {}", username)),
        );
        Ok(())
    }

    /// Handle connection removal
    fn handle_unregister(&mut self, conn: ConnId) {
        if !self.connections.contains_key(&conn) {
            debug!("Ignoring unregister of unknown connection {}", conn);
            return;
        }

        // Membership must be cleaned up before the peer disappears
        self.leave_current_room(conn);

        if let Some(peer) = self.connections.remove(&conn) {
            if self.users.get(&peer.username) == Some(&conn) {
                self.users.remove(&peer.username);
            }
            info!("Unregistered {} ('{}')", conn, peer.username);
        }

        debug!(
            "Total connections: {}, Total rooms: {}",
            self.connections.len(),
            self.rooms.len()
        );
    }

    /// Handle room creation
    fn handle_create_room(&mut self, conn: ConnId, room_name: String) {
        if !self.connections.contains_key(&conn) {
            debug!("Ignoring create_room from unregistered {}", conn);
            return;
        }

        let room_name = room_name.trim();
        if room_name.is_empty() {
            self.reply(conn, (&HubError::InvalidRoomName).into());
            return;
        }

        self.leave_current_room(conn);

        // Generate unique room code
        let code = loop {
            let code = RoomCode::generate();
            if !self.rooms.contains_key(&code) {
                break code;
            }
        };

        let mut room = Room::new(code.clone(), room_name);
        room.add_member(conn);
        self.rooms.insert(code.clone(), room);

        let username = match self.connections.get_mut(&conn) {
            Some(peer) => {
                peer.room = Some(code.clone());
                peer.username.clone()
            }
            None => return,
        };

        info!("'{}' created room {} ('{}')", username, code, room_name);

        self.reply(
            conn,
            ServerResponsePayload::room(
                format!("Created room '{}' with code {}", room_name, code),
                code.as_str(),
                room_name,
            ),
        );
    }

    /// Handle room joining
    fn handle_join(&mut self, conn: ConnId, room: String) {
        let Some(peer) = self.connections.get(&conn) else {
            debug!("Ignoring join from unregistered {}", conn);
            return;
        };

        let code = RoomCode::parse(&room);

        let Some(target) = self.rooms.get(&code) else {
            debug!("'{}' asked for unknown room {}", peer.username, code);
            self.reply(conn, (&HubError::RoomNotFound(code.to_string())).into());
            return;
        };

        if peer.room.as_ref() == Some(&code) {
            let response = ServerResponsePayload::room(
                format!("Already in room '{}'", target.name),
                code.as_str(),
                &target.name,
            );
            self.reply(conn, response);
            return;
        }

        // Never a member of two rooms
        self.leave_current_room(conn);

        let Some(room) = self.rooms.get_mut(&code) else {
            return;
        };
        room.add_member(conn);
        let room_name = room.name.clone();

        let Some(peer) = self.connections.get_mut(&conn) else {
            return;
        };
        peer.room = Some(code.clone());
        let username = peer.username.clone();

        info!("'{}' joined room {}", username, code);

        self.deliver_to_room(
            &code,
            &UserJoinedPayload(UserEventPayload {
                username,
                room: room_name.clone(),
            }),
            Some(conn),
        );

        self.reply(
            conn,
            ServerResponsePayload::room(
                format!("Joined room '{}'", room_name),
                code.as_str(),
                &room_name,
            ),
        );
    }

    /// Handle voluntary room leaving
    fn handle_leave(&mut self, conn: ConnId) {
        let Some(peer) = self.connections.get(&conn) else {
            debug!("Ignoring leave from unregistered {}", conn);
            return;
        };

        if !peer.is_in_room() {
            self.reply(conn, (&HubError::NotInRoom).into());
            return;
        }

        if let Some(room_name) = self.leave_current_room(conn) {
            self.reply(
                conn,
                ServerResponsePayload::ok(format!("Left room '{}'", room_name)),
            );
        }
    }

    /// Handle chat message fan-out
    ///
    /// The sender does not get its own message echoed back.
    fn handle_broadcast(&mut self, conn: ConnId, content: String) {
        let Some(peer) = self.connections.get(&conn) else {
            debug!("Ignoring broadcast from unregistered {}", conn);
            return;
        };

        let Some(code) = peer.room.clone() else {
            warn!(
                "'{}' tried to send a message without joining a room",
                peer.username
            );
            return;
        };

        debug!("[{}] {}: {}", code, peer.username, content);

        let payload = ChatMessagePayload {
            content: format!("{}: {}", peer.username, content),
        };

        // The sender prefix and envelope can push content past the frame cap
        match codec::encode(&payload) {
            Ok(frame) => self.deliver_frame_to_room(&code, frame, Some(conn)),
            Err(e) => {
                warn!("Dropping message from '{}': {}", peer.username, e);
                self.reply(
                    conn,
                    ServerResponsePayload::failure(format!("Message not sent: {}", e)),
                );
            }
        }
    }

    /// Helper: Remove a connection from its room and handle cleanup
    ///
    /// Notifies the remaining members, deletes the room if it became
    /// empty, and returns the room's display name.
    fn leave_current_room(&mut self, conn: ConnId) -> Option<String> {
        let peer = self.connections.get_mut(&conn)?;
        let code = peer.room.take()?;
        let username = peer.username.clone();

        let Some(room) = self.rooms.get_mut(&code) else {
            error!("'{}' referenced missing room {}", username, code);
            return None;
        };

        room.remove_member(conn);
        let room_name = room.name.clone();
        let now_empty = room.is_empty();

        info!("'{}' left room {}", username, code);

        if now_empty {
            self.rooms.remove(&code);
            info!("Room {} deleted (empty)", code);
        } else {
            self.deliver_to_room(
                &code,
                &UserLeftPayload(UserEventPayload {
                    username,
                    room: room_name.clone(),
                }),
                None,
            );
        }

        Some(room_name)
    }

    /// Helper: Encode once and deliver to every member except `exclude`
    fn deliver_to_room<P: Payload>(&mut self, code: &RoomCode, payload: &P, exclude: Option<ConnId>) {
        let frame = match codec::encode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {} for room {}: {}", P::KIND, code, e);
                return;
            }
        };

        self.deliver_frame_to_room(code, frame, exclude);
    }

    /// Helper: Deliver an encoded frame to every member except `exclude`
    fn deliver_frame_to_room(&mut self, code: &RoomCode, frame: Bytes, exclude: Option<ConnId>) {
        let Some(room) = self.rooms.get(code) else {
            warn!("Broadcast to non-existent room {}", code);
            return;
        };

        for member in room.members() {
            if Some(member) == exclude {
                continue;
            }
            self.deliver(member, frame.clone());
        }
    }

    /// Helper: Send a response to a single connection
    fn reply(&mut self, conn: ConnId, response: ServerResponsePayload) {
        match codec::encode(&response) {
            Ok(frame) => self.deliver(conn, frame),
            Err(e) => error!("Failed to encode response for {}: {}", conn, e),
        }
    }

    /// Helper: Non-blocking delivery
    ///
    /// A member whose queue is full or closed is scheduled for removal
    /// instead of stalling the hub.
    fn deliver(&mut self, conn: ConnId, frame: Bytes) {
        let Some(peer) = self.connections.get(&conn) else {
            return;
        };

        if let Err(e) = peer.deliver(frame) {
            warn!("Failed to send to '{}' ({}), unregistering", peer.username, e);
            self.backlog.push_back(Action::Unregister { conn });
        }
    }
}
