//! Message protocol definitions
//!
//! Every frame carries an envelope `{"type": ..., "payload": ...}`. The
//! payload stays an opaque JSON blob until the receiver knows which shape
//! to decode it into; each message type has exactly one payload shape,
//! tied together by the [`Payload`] trait.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{HubError, ProtocolError};

/// Message type tag carried in the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Client → Server: first frame on every connection
    Auth,
    /// Client → Server: create a room and move into it
    CreateRoom,
    /// Client → Server: join a room by code
    Join,
    /// Client → Server: leave the current room
    Leave,
    /// Both directions: chat text
    ChatMessage,
    /// Server → Client: reply to a request
    ServerResponse,
    /// Server → Client: someone entered the room
    UserJoined,
    /// Server → Client: someone left the room
    UserLeft,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Auth => "auth",
            MessageType::CreateRoom => "create_room",
            MessageType::Join => "join",
            MessageType::Leave => "leave",
            MessageType::ChatMessage => "chat_message",
            MessageType::ServerResponse => "server_response",
            MessageType::UserJoined => "user_joined",
            MessageType::UserLeft => "user_left",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope
///
/// `payload` is kept as raw JSON text; use [`Message::decode_payload`]
/// once the type is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub payload: Box<RawValue>,
}

impl Message {
    /// Wrap a typed payload in an envelope
    pub fn new<P: Payload>(payload: &P) -> Result<Self, ProtocolError> {
        let payload = serde_json::value::to_raw_value(payload).map_err(ProtocolError::Encoding)?;
        Ok(Self {
            kind: P::KIND,
            payload,
        })
    }

    /// Decode the opaque payload into the shape belonging to `P::KIND`
    pub fn decode_payload<P: Payload>(&self) -> Result<P, ProtocolError> {
        if self.kind != P::KIND {
            return Err(ProtocolError::UnexpectedType {
                expected: P::KIND,
                actual: self.kind,
            });
        }
        serde_json::from_str(self.payload.get()).map_err(ProtocolError::Decoding)
    }

    /// Whether the payload is JSON `null`
    pub fn has_null_payload(&self) -> bool {
        self.payload.get().trim() == "null"
    }
}

/// A payload shape bound to exactly one message type
pub trait Payload: Serialize + DeserializeOwned {
    const KIND: MessageType;
}

/// `auth`: claim a display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub username: String,
}

/// `create_room`: create a room with the given display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomPayload {
    pub room_name: String,
}

/// `join`: join the room with the given code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub room: String,
}

/// `leave`: no fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeavePayload {}

/// `chat_message`: text sent to a room
///
/// Inbound it carries what the user typed; outbound the content is
/// prefixed with the sender, e.g. `"alice: hi"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub content: String,
}

/// `server_response`: outcome of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponsePayload {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

/// Structured data attached to a successful room response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
}

/// `user_joined` / `user_left`: membership change in the current room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEventPayload {
    pub username: String,
    pub room: String,
}

/// `user_joined`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserJoinedPayload(pub UserEventPayload);

/// `user_left`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserLeftPayload(pub UserEventPayload);

impl Payload for AuthPayload {
    const KIND: MessageType = MessageType::Auth;
}

impl Payload for CreateRoomPayload {
    const KIND: MessageType = MessageType::CreateRoom;
}

impl Payload for JoinPayload {
    const KIND: MessageType = MessageType::Join;
}

impl Payload for LeavePayload {
    const KIND: MessageType = MessageType::Leave;
}

impl Payload for ChatMessagePayload {
    const KIND: MessageType = MessageType::ChatMessage;
}

impl Payload for ServerResponsePayload {
    const KIND: MessageType = MessageType::ServerResponse;
}

impl Payload for UserJoinedPayload {
    const KIND: MessageType = MessageType::UserJoined;
}

impl Payload for UserLeftPayload {
    const KIND: MessageType = MessageType::UserLeft;
}

impl ServerResponsePayload {
    /// Successful response without data
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    /// Successful response describing a room
    pub fn room(message: impl Into<String>, room_code: &str, room_name: &str) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(ResponseData {
                room_code: Some(room_code.to_string()),
                room_name: Some(room_name.to_string()),
            }),
        }
    }

    /// Failed response
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Convert HubError to a failed ServerResponse for client notification
impl From<&HubError> for ServerResponsePayload {
    fn from(err: &HubError) -> Self {
        ServerResponsePayload::failure(err.to_string())
    }
}
