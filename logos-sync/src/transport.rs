//! WebSocket request gateway.
//!
//! One connection carries every request of a session:
//! - a writer task drains an outgoing channel into the socket
//! - a reader task decodes [`WireResponse`]s and completes the matching
//!   pending request by id
//! - a closed socket fails every pending request at once
//!
//! Whatever goes wrong on the way (closed socket, timeout, garbage frame)
//! reaches the state machine as [`Failure::ApplyFailed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::config::ClientConfig;
use crate::failure::Failure;
use crate::gateway::{Reply, Request, RequestGateway};
use crate::protocol::{ProtocolError, WireRequest, WireResponse};

/// Connection state of a [`WsGateway`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Requests waiting for their response.
#[derive(Default)]
struct Pending {
    open: bool,
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
}

pub struct WsGateway {
    url: String,
    request_timeout: Option<Duration>,
    next_id: AtomicU64,
    outgoing: mpsc::Sender<Vec<u8>>,
    pending: Arc<Mutex<Pending>>,
}

impl WsGateway {
    /// Connect to a [`crate::server::SyncServer`] at `url` (`ws://host:port`).
    pub async fn connect(
        url: impl Into<String>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, ProtocolError> {
        let url = url.into();
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.map_err(|e| {
            log::warn!("Connecting to {url} failed: {e}");
            ProtocolError::ConnectionClosed
        })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        log::info!("Connected to manager at {url}");

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let pending = Arc::new(Mutex::new(Pending { open: true, waiters: HashMap::new() }));
        let reader_pending = pending.clone();
        let reader_url = url.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match WireResponse::decode(&data) {
                        Ok(response) => {
                            let waiter = reader_pending.lock().await.waiters.remove(&response.request_id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(response.result);
                                }
                                None => log::trace!("Dropping late response {}", response.request_id),
                            }
                        }
                        Err(e) => log::warn!("Undecodable frame from {reader_url}: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            let mut pending = reader_pending.lock().await;
            pending.open = false;
            // dropping the senders fails every waiter with ConnectionClosed
            pending.waiters.clear();
            log::info!("Connection to {reader_url} closed");
        });

        Ok(Self {
            url,
            request_timeout,
            next_id: AtomicU64::new(1),
            outgoing: out_tx,
            pending,
        })
    }

    /// Connect with the session's `request_timeout`.
    pub async fn for_session(
        url: impl Into<String>,
        config: &ClientConfig,
    ) -> Result<Self, ProtocolError> {
        Self::connect(url, config.request_timeout).await
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub async fn connection_state(&self) -> ConnectionState {
        if self.pending.lock().await.open {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Requests still waiting for a response.
    pub async fn in_flight(&self) -> usize {
        self.pending.lock().await.waiters.len()
    }

    async fn round_trip(&self, request: Request) -> Result<Reply, ProtocolError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let encoded = WireRequest { request_id, request }.encode()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if !pending.open {
                return Err(ProtocolError::ConnectionClosed);
            }
            pending.waiters.insert(request_id, tx);
        }

        if self.outgoing.send(encoded).await.is_err() {
            self.pending.lock().await.waiters.remove(&request_id);
            return Err(ProtocolError::ConnectionClosed);
        }

        let received = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.lock().await.waiters.remove(&request_id);
                    return Err(ProtocolError::Timeout);
                }
            },
            None => rx.await,
        };
        received.map_err(|_| ProtocolError::ConnectionClosed)
    }
}

#[async_trait]
impl RequestGateway for WsGateway {
    async fn send(&self, request: Request) -> Reply {
        let name = request.name();
        match self.round_trip(request).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("{name} to {} failed: {e}", self.url);
                Err(Failure::ApplyFailed)
            }
        }
    }
}
