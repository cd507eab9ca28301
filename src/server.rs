//! Server lifecycle
//!
//! Binds the listener, starts the Hub actor and the accept loop, and
//! tracks every spawned task so `stop` can wait for all of them.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::connection::{handle_connection, ConnectionLimits};
use crate::error::{ConnectionError, HubError};
use crate::hub::{Hub, HubHandle};

/// Entry point for starting a chat server
pub struct ChatServer;

impl ChatServer {
    /// Bind to `config.address()` and start serving in the background
    pub async fn start(config: Config) -> io::Result<RunningServer> {
        let listener = TcpListener::bind(config.address()).await?;
        let local_addr = listener.local_addr()?;
        info!("Chat server listening on {}", local_addr);

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let (hub, handle) = Hub::new(config.request_timeout());
        tracker.spawn(hub.run());

        tracker.spawn(accept_loop(
            listener,
            handle,
            ConnectionLimits::from(&config),
            shutdown.clone(),
            tracker.clone(),
        ));

        Ok(RunningServer {
            local_addr,
            shutdown,
            tracker,
        })
    }
}

/// Handle to a started server
#[derive(Debug)]
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, disconnect every client and wait for all tasks
    ///
    /// Safe to call more than once; later calls just wait.
    pub async fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Shutting down gracefully...");
        }

        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        info!("Server stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled() && self.tracker.is_empty()
    }
}

/// Connection accept loop
///
/// Drops the listener when shutdown is signalled. The hub exits once this
/// loop and every connection task have dropped their handles.
async fn accept_loop(
    listener: TcpListener,
    hub: HubHandle,
    limits: ConnectionLimits,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stopped accepting connections");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let hub = hub.clone();
                let shutdown = shutdown.clone();

                // Spawn handler task for each connection
                tracker.spawn(async move {
                    match handle_connection(stream, hub, limits, shutdown).await {
                        Ok(()) => {}
                        Err(ConnectionError::Hub(HubError::DuplicateUsername(username))) => {
                            warn!("Refused {}: username '{}' is taken", addr, username);
                        }
                        Err(e) => {
                            error!("Connection handler error for {}: {}", addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
