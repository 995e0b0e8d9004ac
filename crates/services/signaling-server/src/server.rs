//! Relay server lifecycle

use crate::config::ServerConfig;
use crate::handler::handle_connection;
use crate::rooms::RoomRegistry;
use parley_core::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// WebSocket room relay
pub struct SignalingServer {
    config: Arc<ServerConfig>,
    registry: Arc<RoomRegistry>,
}

impl SignalingServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(RoomRegistry::new(config.room_capacity));
        Ok(Self {
            config: Arc::new(config),
            registry,
        })
    }

    /// Room registry (for inspection)
    pub fn registry(&self) -> Arc<RoomRegistry> {
        Arc::clone(&self.registry)
    }

    /// Bind and start accepting connections
    ///
    /// Returns once the listener is bound; the accept loop runs until
    /// [`ServerHandle::shutdown`].
    pub async fn start(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.socket_addr()?).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "Signaling relay listening on ws://{}{}",
            local_addr, self.config.path
        );

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let config = Arc::clone(&self.config);
        let registry = Arc::clone(&self.registry);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                debug!("Accepted connection from {}", peer_addr);
                                let registry = Arc::clone(&registry);
                                let config = Arc::clone(&config);
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, registry, config).await {
                                        debug!("Connection from {} ended with error: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Signaling relay received shutdown signal");
                        break;
                    }
                }
            }
            info!("Signaling relay accept loop exited");
        });

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            task,
            registry: self.registry,
        })
    }
}

/// Handle to a running relay
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
    registry: Arc<RoomRegistry>,
}

impl ServerHandle {
    /// Bound address; useful when binding to port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Stop accepting connections and wait for the accept loop to exit
    ///
    /// Connections already open keep running until their peers leave.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("Accept loop panicked: {}", e);
        }
    }
}
