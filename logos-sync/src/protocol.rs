//! Binary wire protocol between [`crate::transport::WsGateway`] and
//! [`crate::server::SyncServer`].
//!
//! Wire format (bincode-encoded, one WebSocket binary frame per message):
//! ```text
//! client ──► server   ┌────────────┬─────────────────────────────────────┐
//!                     │ request_id │ Request (GetDocument|PushEvents|…)  │
//!                     │ varint     │ variable                            │
//!                     └────────────┴─────────────────────────────────────┘
//! server ──► client   ┌────────────┬─────────────────────────────────────┐
//!                     │ request_id │ Result<Response, Failure>           │
//!                     └────────────┴─────────────────────────────────────┘
//! ```
//!
//! Responses may arrive in any order; `request_id` pairs them up.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::{Reply, Request};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    pub request_id: u64,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    pub request_id: u64,
    pub result: Reply,
}

/// Protocol and transport errors. They never reach the state machine:
/// the gateway folds them into a [`crate::Failure`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    SerializationError(String),
    #[error("deserialization error: {0}")]
    DeserializationError(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request timed out")]
    Timeout,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

impl WireRequest {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl WireResponse {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}
