//! # logos-sync: Collaborative editing synchronization client
//!
//! Keeps a local editing surface consistent with a central manager through
//! explicit request/response rounds (fetch, push, pull), driven by a small
//! state machine with typed failures and recovery.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   GetDocument / PushEvents / PullEvents   ┌──────────────┐
//! │ CollabClient │ ◄───────────────────────────────────────► │ SyncServer   │
//! │ (per editor) │          RequestGateway (WsGateway)       │ (central)    │
//! └──────┬───────┘                                           └──────┬───────┘
//!        │                                                          │
//!        ▼                                                          ▼
//! ┌──────────────┐                                           ┌──────────────┐
//! │ SyncState    │ Init → InitDoc → Ready ⇄ Push/Pull        │ Memory-      │
//! │ + Surface    │        ↘ InitError / PushPullError / Fatal│ Authority    │
//! └──────────────┘                                           └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`state`]: states, events and the pure transition table
//! - [`client`]: the driver running one entry action per state
//! - [`policy`]: failure → recovery event and backoff
//! - [`admission`]: which local transactions a state lets through
//! - [`applier`]: writes fetched documents and remote steps to the surface
//! - [`surface`]: the editor contract and an in-memory text surface
//! - [`step`]: insert/delete steps, position mapping and rebasing
//! - [`gateway`]: request/response types and the gateway trait
//! - [`authority`]: in-memory manager
//! - [`protocol`] / [`transport`] / [`server`]: the same gateway over WebSocket

pub mod admission;
pub mod applier;
pub mod authority;
pub mod client;
pub mod config;
pub mod failure;
pub mod gateway;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod state;
pub mod step;
pub mod surface;
pub mod transport;

// Re-exports for convenience
pub use authority::{DocumentLog, MemoryAuthority, DEFAULT_MAX_HISTORY};
pub use client::CollabClient;
pub use config::{ClientConfig, ClientInfo};
pub use failure::{Failure, TransitionError};
pub use gateway::{
    DocumentBody, GetDocument, PullBody, PullEvents, PushEvents, Reply, Request,
    RequestGateway, Response,
};
pub use policy::{FailurePhase, Recovery, RecoveryPolicy, Strategy};
pub use protocol::{ProtocolError, WireRequest, WireResponse};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use state::{
    CollabContext, DebugInfo, DocInfo, Event, EventKind, StateKind, SyncState,
    TransitionRecord,
};
pub use step::{Assoc, Selection, Step, StepError};
pub use surface::{Origin, Sendable, Surface, TextSurface, Transaction};
pub use transport::{ConnectionState, WsGateway};
