//! TCP connection handler
//!
//! Handles individual client connections: authentication, registration
//! with the Hub, and the two flows that follow. The inbound flow decodes
//! frames and turns them into hub actions; the outbound task drains the
//! queue the hub writes to. The two only meet through the hub mailbox and
//! that queue.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{self, MessageCodec};
use crate::config::Config;
use crate::error::{ConnectionError, HubError};
use crate::hub::{HubHandle, DEFAULT_REQUEST_TIMEOUT};
use crate::protocol::{
    AuthPayload, ChatMessagePayload, CreateRoomPayload, JoinPayload, LeavePayload, Message,
    MessageType, ServerResponsePayload,
};
use crate::types::ConnId;

/// Default outbound queue capacity, in frames
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Per-connection tunables
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Outbound queue capacity; a full queue marks the client unresponsive
    pub queue_capacity: usize,
    /// Bound on the auth read, the register round trip and each socket write
    pub request_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl From<&Config> for ConnectionLimits {
    fn from(config: &Config) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            request_timeout: config.request_timeout(),
        }
    }
}

/// Handle a new TCP connection
///
/// Returns once both flows have finished. The connection is always
/// unregistered from the hub before this returns.
pub async fn handle_connection(
    stream: TcpStream,
    hub: HubHandle,
    limits: ConnectionLimits,
    shutdown: CancellationToken,
) -> Result<(), ConnectionError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, MessageCodec::new());
    let mut sink = FramedWrite::new(write_half, BytesCodec::new());

    let auth = tokio::select! {
        _ = shutdown.cancelled() => {
            debug!("Shutdown before {} authenticated", peer_addr);
            return Ok(());
        }
        auth = tokio::time::timeout(limits.request_timeout, authenticate(&mut frames)) => auth,
    };
    let username = match auth {
        Ok(result) => result?,
        Err(_) => {
            return Err(ConnectionError::Authentication(
                "timed out waiting for auth message".to_string(),
            ))
        }
    };

    let conn = ConnId::new();
    info!("Client {} authenticated as '{}' from {}", conn, username, peer_addr);

    // Register with the Hub, which takes sole ownership of the sender
    let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(limits.queue_capacity.max(1));
    let registered = tokio::select! {
        _ = shutdown.cancelled() => {
            // The registration may still land after we stop waiting
            let _ = hub.unregister(conn);
            debug!("Shutdown while registering {}", conn);
            return Ok(());
        }
        registered = hub.register(conn, username.clone(), outbound_tx) => registered,
    };
    if let Err(e) = registered {
        match &e {
            HubError::DuplicateUsername(_) => {
                // Writer task is not running yet, so the socket is ours
                let frame = codec::encode(&ServerResponsePayload::from(&e))?;
                sink.send(frame).await?;
                let _ = SinkExt::<Bytes>::close(&mut sink).await;
            }
            _ => {
                // The registration may still land after a timeout
                let _ = hub.unregister(conn);
            }
        }
        return Err(e.into());
    }

    let closed = shutdown.child_token();

    // Spawn write task (queue -> socket)
    let writer = tokio::spawn(write_outbound(
        sink,
        outbound_rx,
        hub.clone(),
        conn,
        limits.request_timeout,
        closed.clone(),
    ));

    // Read loop (socket -> hub actions)
    let result = read_inbound(&mut frames, &hub, conn, &username, &closed).await;

    let _ = hub.unregister(conn);

    if let Err(e) = writer.await {
        warn!("Write task for {} failed: {}", conn, e);
    }

    info!("Client {} ('{}') disconnected", conn, username);

    result
}

/// Read exactly one `Auth` frame and return the claimed username
async fn authenticate<R>(frames: &mut FramedRead<R, MessageCodec>) -> Result<String, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let message = match frames.next().await {
        Some(Ok(message)) => message,
        Some(Err(e)) => {
            return Err(ConnectionError::Authentication(format!(
                "failed to read auth message: {}",
                e
            )))
        }
        None => {
            return Err(ConnectionError::Authentication(
                "connection closed before auth".to_string(),
            ))
        }
    };

    if message.kind != MessageType::Auth {
        return Err(ConnectionError::Authentication(format!(
            "expected auth message, got {}",
            message.kind
        )));
    }

    let auth: AuthPayload = message.decode_payload().map_err(|e| {
        ConnectionError::Authentication(format!("failed to decode auth payload: {}", e))
    })?;

    let username = auth.username.trim();
    if username.is_empty() {
        return Err(ConnectionError::Authentication(
            "username cannot be empty".to_string(),
        ));
    }

    Ok(username.to_string())
}

/// Decode frames and forward them to the Hub until the stream ends
///
/// Clean EOF and cancellation end the loop with `Ok`; protocol errors
/// are returned and end the connection.
async fn read_inbound<R>(
    frames: &mut FramedRead<R, MessageCodec>,
    hub: &HubHandle,
    conn: ConnId,
    username: &str,
    closed: &CancellationToken,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => {
                debug!("Read task for {} cancelled", conn);
                return Ok(());
            }
            next = frames.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!("Protocol error from '{}': {}", username, e);
                return Err(e.into());
            }
            None => {
                debug!("Client {} closed the connection", conn);
                return Ok(());
            }
        };

        dispatch(hub, conn, username, message)?;
    }
}

/// Convert an inbound message into a hub action
fn dispatch(
    hub: &HubHandle,
    conn: ConnId,
    username: &str,
    message: Message,
) -> Result<(), ConnectionError> {
    match message.kind {
        MessageType::CreateRoom => {
            let payload: CreateRoomPayload = message.decode_payload()?;
            hub.create_room(conn, payload.room_name)?;
        }
        MessageType::Join => {
            let payload: JoinPayload = message.decode_payload()?;
            hub.join(conn, payload.room)?;
        }
        MessageType::Leave => {
            // Payload carries nothing, so `{}` and `null` are both accepted
            if !message.has_null_payload() {
                let _: LeavePayload = message.decode_payload()?;
            }
            hub.leave(conn)?;
        }
        MessageType::ChatMessage => {
            let payload: ChatMessagePayload = message.decode_payload()?;
            if payload.content.trim().is_empty() {
                debug!("Dropping empty chat message from '{}'", username);
            } else {
                hub.broadcast(conn, payload.content)?;
            }
        }
        MessageType::Auth => {
            warn!("'{}' sent a second auth message, ignoring", username);
        }
        MessageType::ServerResponse | MessageType::UserJoined | MessageType::UserLeft => {
            warn!(
                "'{}' sent server-only message type {}, ignoring",
                username, message.kind
            );
        }
    }
    Ok(())
}

/// Drain the outbound queue into the socket
///
/// Ends when the Hub closes the queue, a write fails or stalls past
/// `write_timeout`, or the connection is cancelled. Always cancels
/// `closed` on the way out so the read loop does not outlive the writer.
async fn write_outbound<W>(
    mut sink: FramedWrite<W, BytesCodec>,
    mut outbound: mpsc::Receiver<Bytes>,
    hub: HubHandle,
    conn: ConnId,
    write_timeout: Duration,
    closed: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let drained = loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break false,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => {
                    debug!("Outbound queue for {} closed", conn);
                    break true;
                }
            },
        };

        let written = tokio::select! {
            _ = closed.cancelled() => break false,
            written = tokio::time::timeout(write_timeout, sink.send(frame)) => written,
        };

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to {} failed: {}", conn, e);
                let _ = hub.unregister(conn);
                break false;
            }
            Err(_) => {
                warn!("Write to {} stalled for {:?}, dropping client", conn, write_timeout);
                let _ = hub.unregister(conn);
                break false;
            }
        }
    };

    closed.cancel();

    // A stalled peer may never accept the flush; dropping the sink still
    // shuts down the write half
    if drained {
        let _ = tokio::time::timeout(write_timeout, SinkExt::<Bytes>::close(&mut sink)).await;
    }
    debug!("Write task ended for {}", conn);
}
