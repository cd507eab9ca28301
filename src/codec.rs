//! Length-prefixed frame codec
//!
//! Frame format: `[length: u32 big-endian][length bytes: JSON envelope]`.
//! Frames whose declared length exceeds the maximum are rejected before
//! any of the body is buffered.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::protocol::{Message, Payload};

/// Maximum envelope size accepted or produced (1 MiB)
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Size of the length prefix
const LENGTH_PREFIX: usize = 4;

/// Encode a typed payload into a complete frame
///
/// The envelope type comes from the payload's shape. The result is
/// cheap to clone, so one encoded frame can be fanned out to a room.
pub fn encode<P: Payload>(payload: &P) -> Result<Bytes, ProtocolError> {
    let message = Message::new(payload)?;
    encode_message(&message)
}

/// Encode an envelope into a complete frame
pub fn encode_message(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut dst = BytesMut::new();
    <MessageCodec as Encoder<&Message>>::encode(&mut MessageCodec::new(), message, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode exactly one complete frame
///
/// Trailing bytes after the first frame are ignored.
pub fn decode_frame(frame: &[u8]) -> Result<Message, ProtocolError> {
    let mut src = BytesMut::from(frame);
    match MessageCodec::new().decode_eof(&mut src)? {
        Some(message) => Ok(message),
        None => Err(ProtocolError::Framing(0)),
    }
}

/// tokio-util codec for the chat wire protocol
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_frame_length: usize,
}

impl MessageCodec {
    /// Codec with the default 1 MiB limit
    pub fn new() -> Self {
        Self {
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }

    /// Codec with a custom frame limit
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > self.max_frame_length {
            return Err(ProtocolError::MessageTooLarge {
                len,
                max: self.max_frame_length,
            });
        }

        if src.len() < LENGTH_PREFIX + len {
            src.reserve(LENGTH_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let body = src.split_to(len);
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(ProtocolError::Decoding)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::Framing(src.len())),
        }
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let body = serde_json::to_vec(message).map_err(ProtocolError::Encoding)?;
        if body.len() > self.max_frame_length {
            return Err(ProtocolError::MessageTooLarge {
                len: body.len(),
                max: self.max_frame_length,
            });
        }

        dst.reserve(LENGTH_PREFIX + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        <Self as Encoder<&Message>>::encode(self, &message, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::protocol::{
        AuthPayload, ChatMessagePayload, MessageType, ServerResponsePayload, UserEventPayload,
        UserLeftPayload,
    };

    #[test]
    fn test_frame_layout() {
        let frame = encode(&ChatMessagePayload {
            content: "hi".to_string(),
        })
        .unwrap();

        let body = br#"{"type":"chat_message","payload":{"content":"hi"}}"#;
        assert_eq!(&frame[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&frame[4..], &body[..]);
    }

    #[test]
    fn test_decode_frame_roundtrip() {
        let response = ServerResponsePayload::room("Joined room", "ABC123", "general");
        let frame = encode(&response).unwrap();

        let message = decode_frame(&frame).unwrap();
        assert_eq!(message.kind, MessageType::ServerResponse);
        assert_eq!(
            message.decode_payload::<ServerResponsePayload>().unwrap(),
            response
        );
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let frame = encode(&AuthPayload {
            username: "alice".to_string(),
        })
        .unwrap();

        let mut codec = MessageCodec::new();
        let mut src = BytesMut::from(&frame[..2]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&frame[2..10]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&frame[10..]);
        let message = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(message.kind, MessageType::Auth);
        assert!(src.is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected_from_prefix() {
        let mut codec = MessageCodec::new();
        let mut src = BytesMut::new();
        src.put_u32((MAX_FRAME_LENGTH + 1) as u32);

        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MessageTooLarge { len, max }
                if len == MAX_FRAME_LENGTH + 1 && max == MAX_FRAME_LENGTH
        ));
    }

    #[test]
    fn test_frame_at_limit_is_accepted() {
        let mut codec = MessageCodec::with_max_frame_length(64);
        let body = br#"{"type":"leave","payload":{}}"#;
        let mut src = BytesMut::new();
        src.put_u32(body.len() as u32);
        src.extend_from_slice(body);

        let message = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(message.kind, MessageType::Leave);
    }

    #[test]
    fn test_encode_refuses_oversized_payload() {
        let mut codec = MessageCodec::with_max_frame_length(16);
        let message = Message::new(&ChatMessagePayload {
            content: "this will not fit".to_string(),
        })
        .unwrap();
        let mut dst = BytesMut::new();

        let err = codec.encode(&message, &mut dst).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { max: 16, .. }));
        assert!(dst.is_empty());
    }

    #[test]
    fn test_malformed_json_is_decoding_error() {
        let body = b"{not json";
        let mut src = BytesMut::new();
        src.put_u32(body.len() as u32);
        src.extend_from_slice(body);

        let err = MessageCodec::new().decode(&mut src).unwrap_err();
        assert!(matches!(err, ProtocolError::Decoding(_)));
    }

    #[test]
    fn test_truncated_stream_is_framing_error() {
        let mut codec = MessageCodec::new();

        let mut src = BytesMut::from(&[0u8, 0][..]);
        assert!(matches!(
            codec.decode_eof(&mut src),
            Err(ProtocolError::Framing(2))
        ));

        let mut src = BytesMut::new();
        assert!(codec.decode_eof(&mut src).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_framed_stream_roundtrip() {
        let (writer, reader) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(writer, MessageCodec::new());
        let mut stream = FramedRead::new(reader, MessageCodec::new());

        let left = UserLeftPayload(UserEventPayload {
            username: "bob".to_string(),
            room: "general".to_string(),
        });
        sink.send(Message::new(&left).unwrap()).await.unwrap();
        sink.send(
            Message::new(&ChatMessagePayload {
                content: "alice: hi".to_string(),
            })
            .unwrap(),
        )
        .await
        .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.decode_payload::<UserLeftPayload>().unwrap(), left);

        let second = stream.next().await.unwrap().unwrap();
        let chat: ChatMessagePayload = second.decode_payload().unwrap();
        assert_eq!(chat.content, "alice: hi");
    }

    #[tokio::test]
    async fn test_stream_closed_mid_frame() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut stream = FramedRead::new(reader, MessageCodec::new());

        writer.write_all(&[0, 0, 0, 10, b'{']).await.unwrap();
        drop(writer);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::Framing(5)));
    }
}
