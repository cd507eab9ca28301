//! Chat client library
//!
//! Connects to a server, authenticates, and wraps the request/response
//! flows (create, join, leave) with a bounded wait. Unsolicited traffic
//! (chat text, join/leave notices) is exposed as a stream of [`ChatEvent`]s.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::codec::MessageCodec;
use crate::error::{ClientError, ProtocolError};
use crate::hub::DEFAULT_REQUEST_TIMEOUT;
use crate::protocol::{
    AuthPayload, ChatMessagePayload, CreateRoomPayload, JoinPayload, LeavePayload, Message,
    MessageType, Payload, ServerResponsePayload, UserJoinedPayload, UserLeftPayload,
};

/// Room the client is currently in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub code: String,
    pub name: String,
}

/// Server push received outside any request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Chat text, already prefixed with the sender (`"alice: hi"`)
    Message(String),
    UserJoined { username: String, room: String },
    UserLeft { username: String, room: String },
}

/// Connected, authenticated chat client
pub struct ChatClient {
    username: String,
    room: Option<RoomInfo>,
    sink: FramedWrite<OwnedWriteHalf, MessageCodec>,
    responses: mpsc::UnboundedReceiver<ServerResponsePayload>,
    events: mpsc::UnboundedReceiver<ChatEvent>,
    reader: JoinHandle<()>,
    request_timeout: Duration,
}

impl ChatClient {
    /// Connect and authenticate with the default 5 second request timeout
    pub async fn connect<A: ToSocketAddrs>(addr: A, username: &str) -> Result<Self, ClientError> {
        Self::connect_with_timeout(addr, username, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Connect and authenticate
    ///
    /// Fails with `Rejected` if the server refuses the username.
    pub async fn connect_with_timeout<A: ToSocketAddrs>(
        addr: A,
        username: &str,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let (responses_tx, responses) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_server_frames(
            FramedRead::new(read_half, MessageCodec::new()),
            responses_tx,
            events_tx,
        ));

        let mut client = Self {
            username: username.to_string(),
            room: None,
            sink: FramedWrite::new(write_half, MessageCodec::new()),
            responses,
            events,
            reader,
            request_timeout,
        };

        client
            .request(&AuthPayload {
                username: username.to_string(),
            })
            .await?;

        info!("Authenticated with server as {}", username);
        Ok(client)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn current_room(&self) -> Option<&RoomInfo> {
        self.room.as_ref()
    }

    /// Create a room and move into it; returns its code and name
    pub async fn create_room(&mut self, room_name: &str) -> Result<RoomInfo, ClientError> {
        let response = self
            .request(&CreateRoomPayload {
                room_name: room_name.to_string(),
            })
            .await?;
        self.enter_room(response)
    }

    /// Join a room by code
    pub async fn join_room(&mut self, room_code: &str) -> Result<RoomInfo, ClientError> {
        let response = self
            .request(&JoinPayload {
                room: room_code.to_string(),
            })
            .await?;
        self.enter_room(response)
    }

    /// Leave the current room
    pub async fn leave_room(&mut self) -> Result<(), ClientError> {
        if self.room.is_none() {
            return Err(ClientError::NotInRoom);
        }

        self.request(&LeavePayload {}).await?;
        self.room = None;
        Ok(())
    }

    /// Send chat text to the current room (no response expected)
    pub async fn send_message(&mut self, content: &str) -> Result<(), ClientError> {
        if self.room.is_none() {
            return Err(ClientError::NotInRoom);
        }

        self.send(&ChatMessagePayload {
            content: content.to_string(),
        })
        .await
    }

    /// Next pushed event; `None` once the server connection is gone
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    /// Close the write side of the connection
    pub async fn close(mut self) -> Result<(), ClientError> {
        SinkExt::<Message>::close(&mut self.sink).await?;
        Ok(())
    }

    async fn send<P: Payload>(&mut self, payload: &P) -> Result<(), ClientError> {
        self.sink.send(Message::new(payload)?).await?;
        Ok(())
    }

    /// Send a request and wait for the matching `ServerResponse`
    async fn request<P: Payload>(&mut self, payload: &P) -> Result<ServerResponsePayload, ClientError> {
        // Discard answers to requests that already timed out
        while let Ok(stale) = self.responses.try_recv() {
            debug!("Discarding stale response: {}", stale.message);
        }

        self.send(payload).await?;

        match tokio::time::timeout(self.request_timeout, self.responses.recv()).await {
            Ok(Some(response)) if response.success => Ok(response),
            Ok(Some(response)) => Err(ClientError::Rejected(response.message)),
            Ok(None) => Err(ClientError::Disconnected),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    fn enter_room(&mut self, response: ServerResponsePayload) -> Result<RoomInfo, ClientError> {
        let data = response
            .data
            .ok_or(ClientError::MalformedResponse("no room data in response"))?;
        let code = data
            .room_code
            .ok_or(ClientError::MalformedResponse("no room code in response"))?;
        let name = data
            .room_name
            .ok_or(ClientError::MalformedResponse("no room name in response"))?;

        let room = RoomInfo { code, name };
        self.room = Some(room.clone());
        Ok(room)
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Route server frames to the response and event channels
async fn read_server_frames(
    mut frames: FramedRead<OwnedReadHalf, MessageCodec>,
    responses: mpsc::UnboundedSender<ServerResponsePayload>,
    events: mpsc::UnboundedSender<ChatEvent>,
) {
    while let Some(next) = frames.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                warn!("Connection closed: {}", e);
                break;
            }
        };

        let kind = message.kind;
        if let Err(e) = route(message, &responses, &events) {
            warn!("Failed to decode {} from server: {}", kind, e);
        }
    }
    debug!("Server connection closed");
}

fn route(
    message: Message,
    responses: &mpsc::UnboundedSender<ServerResponsePayload>,
    events: &mpsc::UnboundedSender<ChatEvent>,
) -> Result<(), ProtocolError> {
    match message.kind {
        MessageType::ServerResponse => {
            let _ = responses.send(message.decode_payload()?);
        }
        MessageType::ChatMessage => {
            let payload: ChatMessagePayload = message.decode_payload()?;
            let _ = events.send(ChatEvent::Message(payload.content));
        }
        MessageType::UserJoined => {
            let UserJoinedPayload(event) = message.decode_payload()?;
            let _ = events.send(ChatEvent::UserJoined {
                username: event.username,
                room: event.room,
            });
        }
        MessageType::UserLeft => {
            let UserLeftPayload(event) = message.decode_payload()?;
            let _ = events.send(ChatEvent::UserLeft {
                username: event.username,
                room: event.room,
            });
        }
        other => warn!("Unexpected message type from server: {}", other),
    }
    Ok(())
}
