//! Failure taxonomy shared by the gateway, the state machine and the
//! recovery policy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{EventKind, StateKind};

/// Every way a request to the manager can fail.
///
/// Failures are data: they travel inside `InitError` / `PushPullError`
/// states and are never raised past the state machine.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Failure {
    /// The manager could not apply the submitted steps, or the request did
    /// not make it there and back.
    #[error("steps could not be applied")]
    ApplyFailed,
    #[error("document not found")]
    DocumentNotFound,
    /// The requested version predates the history the manager still keeps.
    #[error("history not available")]
    HistoryNotAvailable,
    #[error("request reached the wrong manager")]
    IncorrectManager,
    /// The client claims a version the manager never produced.
    #[error("invalid version")]
    InvalidVersion,
    /// The manager has steps the client has not seen yet.
    #[error("outdated version")]
    OutdatedVersion,
}

impl Failure {
    pub const ALL: [Failure; 6] = [
        Failure::ApplyFailed,
        Failure::DocumentNotFound,
        Failure::HistoryNotAvailable,
        Failure::IncorrectManager,
        Failure::InvalidVersion,
        Failure::OutdatedVersion,
    ];
}

/// An event was dispatched to a state that has no transition for it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no transition from {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: StateKind,
    pub event: EventKind,
}
