//! End-to-end tests against a server on an ephemeral port

use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use room_chat::protocol::{AuthPayload, JoinPayload, LeavePayload};
use room_chat::{
    decode_frame, encode, ChatClient, ChatEvent, ChatServer, ClientError, Config, MessageType,
    RunningServer, MAX_FRAME_LENGTH,
};

const WAIT: Duration = Duration::from_secs(2);

fn local_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Config::default()
    }
}

async fn start_server() -> Result<RunningServer> {
    Ok(ChatServer::start(local_config()).await?)
}

async fn next_event(client: &mut ChatClient) -> Result<Option<ChatEvent>> {
    Ok(timeout(WAIT, client.next_event()).await?)
}

/// Read one length-prefixed frame off a raw socket
async fn read_frame(stream: &mut TcpStream) -> Result<room_chat::Message> {
    let len = stream.read_u32().await? as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;

    let mut frame = (len as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(&body);
    Ok(decode_frame(&frame)?)
}

/// Wait until the server closes the socket
async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let read = timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("server did not close the connection");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected read: {:?}", read);
}

#[tokio::test]
async fn test_create_join_and_chat() -> Result<()> {
    let server = start_server().await?;
    let addr = server.local_addr();

    let mut alice = ChatClient::connect(addr, "alice").await?;
    let mut bob = ChatClient::connect(addr, "bob").await?;

    let room = alice.create_room("general").await?;
    assert_eq!(room.name, "general");
    assert_eq!(room.code.len(), 6);

    // Codes are case-insensitive
    let joined = bob.join_room(&room.code.to_lowercase()).await?;
    assert_eq!(joined, room);
    assert_eq!(bob.current_room(), Some(&room));

    assert_eq!(
        next_event(&mut alice).await?,
        Some(ChatEvent::UserJoined {
            username: "bob".to_string(),
            room: "general".to_string(),
        })
    );

    alice.send_message("hi").await?;
    assert_eq!(
        next_event(&mut bob).await?,
        Some(ChatEvent::Message("alice: hi".to_string()))
    );

    // No echo back to the sender
    assert!(timeout(Duration::from_millis(200), alice.next_event())
        .await
        .is_err());

    bob.leave_room().await?;
    assert_eq!(
        next_event(&mut alice).await?,
        Some(ChatEvent::UserLeft {
            username: "bob".to_string(),
            room: "general".to_string(),
        })
    );

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_username_is_rejected() -> Result<()> {
    let server = start_server().await?;
    let addr = server.local_addr();

    let alice = ChatClient::connect(addr, "alice").await?;
    let err = ChatClient::connect(addr, "alice").await.err();

    match err {
        Some(ClientError::Rejected(message)) => assert!(message.contains("already taken")),
        other => panic!("expected rejection, got {:?}", other),
    }

    // The name is free again once its owner leaves
    drop(alice);
    let mut retry = None;
    for _ in 0..20 {
        match ChatClient::connect(addr, "alice").await {
            Ok(client) => {
                retry = Some(client);
                break;
            }
            Err(ClientError::Rejected(_)) => tokio::time::sleep(Duration::from_millis(50)).await,
            Err(e) => return Err(e.into()),
        }
    }
    assert!(retry.is_some());

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_empty_room_is_deleted() -> Result<()> {
    let server = start_server().await?;
    let addr = server.local_addr();

    let mut alice = ChatClient::connect(addr, "alice").await?;
    let mut bob = ChatClient::connect(addr, "bob").await?;

    let first = alice.create_room("first").await?;
    let second = alice.create_room("second").await?;
    assert_ne!(first.code, second.code);
    assert_eq!(alice.current_room(), Some(&second));

    match bob.join_room(&first.code).await {
        Err(ClientError::Rejected(message)) => assert!(message.contains("not found")),
        other => panic!("expected room not found, got {:?}", other),
    }

    assert_eq!(bob.join_room(&second.code).await?, second);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_leave_without_room() -> Result<()> {
    let server = start_server().await?;
    let mut alice = ChatClient::connect(server.local_addr(), "alice").await?;

    assert!(matches!(alice.leave_room().await, Err(ClientError::NotInRoom)));
    assert!(matches!(
        alice.send_message("hello?").await,
        Err(ClientError::NotInRoom)
    ));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_oversized_frame_closes_only_that_connection() -> Result<()> {
    let server = start_server().await?;
    let addr = server.local_addr();

    let mut alice = ChatClient::connect(addr, "alice").await?;
    let room = alice.create_room("general").await?;

    let mut raw = TcpStream::connect(addr).await?;
    raw.write_all(&encode(&AuthPayload {
        username: "mallory".to_string(),
    })?)
    .await?;

    let welcome = timeout(WAIT, read_frame(&mut raw)).await??;
    assert_eq!(welcome.kind, MessageType::ServerResponse);

    raw.write_u32((MAX_FRAME_LENGTH + 1) as u32).await?;
    assert_closed(&mut raw).await;

    // Everyone else keeps working
    let mut bob = ChatClient::connect(addr, "bob").await?;
    bob.join_room(&room.code).await?;
    bob.send_message("still here").await?;

    assert!(matches!(
        next_event(&mut alice).await?,
        Some(ChatEvent::UserJoined { .. })
    ));
    assert_eq!(
        next_event(&mut alice).await?,
        Some(ChatEvent::Message("bob: still here".to_string()))
    );

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_first_frame_must_be_auth() -> Result<()> {
    let server = start_server().await?;

    let mut raw = TcpStream::connect(server.local_addr()).await?;
    raw.write_all(&encode(&LeavePayload {})?).await?;
    assert_closed(&mut raw).await;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_stop_disconnects_clients() -> Result<()> {
    let server = start_server().await?;
    let addr = server.local_addr();

    let mut alice = ChatClient::connect(addr, "alice").await?;
    alice.create_room("general").await?;

    timeout(WAIT, server.stop()).await?;
    assert!(server.is_stopped());
    assert_eq!(next_event(&mut alice).await?, None);

    // Second stop is a no-op
    timeout(WAIT, server.stop()).await?;

    assert!(TcpStream::connect(addr).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_stop_with_unauthenticated_socket() -> Result<()> {
    let server = start_server().await?;

    let _idle = TcpStream::connect(server.local_addr()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Must not wait out the auth timeout
    timeout(Duration::from_secs(1), server.stop()).await?;
    assert!(server.is_stopped());
    Ok(())
}

#[tokio::test]
async fn test_member_that_stops_reading_is_evicted() -> Result<()> {
    let config = Config {
        queue_capacity: 4,
        request_timeout_secs: 1,
        ..local_config()
    };
    let server = ChatServer::start(config).await?;
    let addr = server.local_addr();

    let mut alice = ChatClient::connect(addr, "alice").await?;
    let room = alice.create_room("general").await?;

    let mut slow = TcpStream::connect(addr).await?;
    slow.write_all(&encode(&AuthPayload {
        username: "slow".to_string(),
    })?)
    .await?;
    timeout(WAIT, read_frame(&mut slow)).await??;
    slow.write_all(&encode(&JoinPayload {
        room: room.code.clone(),
    })?)
    .await?;
    timeout(WAIT, read_frame(&mut slow)).await??;

    assert!(matches!(
        next_event(&mut alice).await?,
        Some(ChatEvent::UserJoined { .. })
    ));

    // `slow` never reads again; fill its queue and socket buffers
    let content = "x".repeat(512 * 1024);
    for _ in 0..64 {
        alice.send_message(&content).await?;
    }

    assert_eq!(
        timeout(Duration::from_secs(10), alice.next_event()).await?,
        Some(ChatEvent::UserLeft {
            username: "slow".to_string(),
            room: "general".to_string(),
        })
    );

    // Eviction frees the name
    let again = ChatClient::connect(addr, "slow").await?;
    drop(again);

    timeout(Duration::from_secs(5), server.stop()).await?;
    assert!(server.is_stopped());
    drop(slow);
    Ok(())
}
