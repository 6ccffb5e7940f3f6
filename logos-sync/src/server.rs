//! WebSocket front end for a [`MemoryAuthority`].
//!
//! ```text
//! WsGateway A ──┐                      ┌── DocumentLog "notes"
//!               ├── SyncServer ── MemoryAuthority
//! WsGateway B ──┘                      └── DocumentLog "todo"
//! ```
//!
//! Every connection is served by its own task. Each binary frame is one
//! [`WireRequest`]; the answer goes back as one [`WireResponse`] frame with
//! the same id. Requests on one connection are answered in order.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

use crate::authority::{MemoryAuthority, DEFAULT_MAX_HISTORY};
use crate::gateway::RequestGateway;
use crate::protocol::{WireRequest, WireResponse};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Identity handed to clients in `GetDocument` responses
    pub manager_id: String,
    /// Steps retained per document
    pub max_history: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            manager_id: "manager-1".to_string(),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_bytes: u64,
}

pub struct SyncServer {
    config: ServerConfig,
    authority: Arc<MemoryAuthority>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let authority = Arc::new(MemoryAuthority::with_history(
            config.manager_id.clone(),
            config.max_history,
        ));
        Self { config, authority, stats: Arc::new(RwLock::new(ServerStats::default())) }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// The authority behind the socket, for seeding documents.
    pub fn authority(&self) -> &Arc<MemoryAuthority> {
        &self.authority
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!(
            "Sync server {} listening on {}",
            self.config.manager_id,
            self.config.bind_addr
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let authority = self.authority.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, authority, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        authority: Arc<MemoryAuthority>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let served = async {
            while let Some(msg) = ws_receiver.next().await {
                match msg? {
                    Message::Binary(data) => {
                        let wire = match WireRequest::decode(&data) {
                            Ok(wire) => wire,
                            Err(e) => {
                                // no request id to answer with; the client times out
                                log::warn!("Undecodable request from {addr}: {e}");
                                continue;
                            }
                        };
                        let name = wire.request.name();
                        let result = authority.send(wire.request).await;
                        if let Err(failure) = &result {
                            log::debug!("{name} from {addr} refused: {failure}");
                        }

                        {
                            let mut s = stats.write().await;
                            s.total_requests += 1;
                            s.total_bytes += data.len() as u64;
                            if result.is_err() {
                                s.failed_requests += 1;
                            }
                        }

                        let response = WireResponse { request_id: wire.request_id, result };
                        ws_sender.send(Message::Binary(response.encode()?.into())).await?;
                    }
                    Message::Ping(data) => ws_sender.send(Message::Pong(data)).await?,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        stats.write().await.active_connections -= 1;
        log::info!("Connection from {addr} closed");
        served
    }
}
