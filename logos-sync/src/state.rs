//! Synchronization states, events and the pure transition function.
//!
//! ```text
//! Init ──InitDoc──► InitDoc ──Ready──► Ready ──Push──► Push ──Pull──► Pull
//!   │                                    │  ▲            │ Ready        │ Ready
//!   │ InitError                          │  └────────────┴──────────────┘
//!   ▼                                    └──Pull──► Pull
//! InitError ──Restart──► Init
//!   └──FatalError──► FatalError          Push | Pull ──PushPullError──► PushPullError
//!                                        PushPullError ──Pull──► Pull
//!                                        PushPullError ──Restart──► Init
//!                                        PushPullError ──FatalError──► FatalError
//! ```
//!
//! Exactly one [`SyncState`] is alive at a time. [`SyncState::transition`]
//! is total over the table above and returns a [`TransitionError`] for every
//! other pair.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::failure::{Failure, TransitionError};
use crate::step::Selection;

/// Transitions kept in [`DebugInfo`].
const MAX_TRACE: usize = 64;

/// Document baseline fetched from the manager, carried unchanged from
/// `InitDoc` through `Ready`/`Push`/`Pull` until the next restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocInfo {
    pub initial_doc: String,
    pub initial_version: u64,
    pub initial_selection: Option<Selection>,
    pub manager_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// No document loaded yet.
    Init,
    /// Document fetched, not yet applied.
    InitDoc(Arc<DocInfo>),
    InitError { failure: Failure },
    /// Document applied, no request outstanding.
    Ready(Arc<DocInfo>),
    /// Local steps being sent.
    Push(Arc<DocInfo>),
    /// Remote steps being requested.
    Pull(Arc<DocInfo>),
    PushPullError { failure: Failure, doc_info: Arc<DocInfo> },
    /// Terminal.
    FatalError { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    InitDoc(Arc<DocInfo>),
    InitError(Failure),
    Ready,
    Push,
    Pull,
    PushPullError(Failure),
    Restart,
    FatalError(String),
}

/// Payload-free discriminant of [`SyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Init,
    InitDoc,
    InitError,
    Ready,
    Push,
    Pull,
    PushPullError,
    FatalError,
}

/// Payload-free discriminant of [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    InitDoc,
    InitError,
    Ready,
    Push,
    Pull,
    PushPullError,
    Restart,
    FatalError,
}

impl StateKind {
    pub const ALL: [StateKind; 8] = [
        StateKind::Init,
        StateKind::InitDoc,
        StateKind::InitError,
        StateKind::Ready,
        StateKind::Push,
        StateKind::Pull,
        StateKind::PushPullError,
        StateKind::FatalError,
    ];

    /// Whether ordinary local edits may change the document in this state.
    pub fn accepts_local_edits(self) -> bool {
        match self {
            StateKind::Ready | StateKind::Push | StateKind::Pull | StateKind::PushPullError => true,
            StateKind::Init | StateKind::InitDoc | StateKind::InitError | StateKind::FatalError => false,
        }
    }

    /// Whether a document baseline is installed in this state.
    pub fn has_document(self) -> bool {
        matches!(
            self,
            StateKind::Ready | StateKind::Push | StateKind::Pull | StateKind::PushPullError
        )
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::InitDoc(_) => EventKind::InitDoc,
            Event::InitError(_) => EventKind::InitError,
            Event::Ready => EventKind::Ready,
            Event::Push => EventKind::Push,
            Event::Pull => EventKind::Pull,
            Event::PushPullError(_) => EventKind::PushPullError,
            Event::Restart => EventKind::Restart,
            Event::FatalError(_) => EventKind::FatalError,
        }
    }
}

impl SyncState {
    pub fn kind(&self) -> StateKind {
        match self {
            SyncState::Init => StateKind::Init,
            SyncState::InitDoc(_) => StateKind::InitDoc,
            SyncState::InitError { .. } => StateKind::InitError,
            SyncState::Ready(_) => StateKind::Ready,
            SyncState::Push(_) => StateKind::Push,
            SyncState::Pull(_) => StateKind::Pull,
            SyncState::PushPullError { .. } => StateKind::PushPullError,
            SyncState::FatalError { .. } => StateKind::FatalError,
        }
    }

    /// Document baseline, if one has been fetched.
    pub fn doc_info(&self) -> Option<&Arc<DocInfo>> {
        match self {
            SyncState::InitDoc(info)
            | SyncState::Ready(info)
            | SyncState::Push(info)
            | SyncState::Pull(info)
            | SyncState::PushPullError { doc_info: info, .. } => Some(info),
            SyncState::Init | SyncState::InitError { .. } | SyncState::FatalError { .. } => None,
        }
    }

    /// Compute the state that follows `event`.
    pub fn transition(&self, event: Event) -> Result<SyncState, TransitionError> {
        let invalid = TransitionError { from: self.kind(), event: event.kind() };
        let next = match (self, event) {
            (SyncState::Init, Event::InitDoc(info)) => SyncState::InitDoc(info),
            (SyncState::Init, Event::InitError(failure)) => SyncState::InitError { failure },

            (SyncState::InitDoc(info), Event::Ready) => SyncState::Ready(Arc::clone(info)),

            (SyncState::InitError { .. }, Event::Restart) => SyncState::Init,
            (SyncState::InitError { .. }, Event::FatalError(message)) => {
                SyncState::FatalError { message }
            }

            (SyncState::Ready(info), Event::Push) => SyncState::Push(Arc::clone(info)),
            (SyncState::Ready(info), Event::Pull) => SyncState::Pull(Arc::clone(info)),

            (SyncState::Push(info), Event::Ready) => SyncState::Ready(Arc::clone(info)),
            (SyncState::Push(info), Event::Pull) => SyncState::Pull(Arc::clone(info)),
            (SyncState::Push(info), Event::PushPullError(failure)) => SyncState::PushPullError {
                failure,
                doc_info: Arc::clone(info),
            },

            (SyncState::Pull(info), Event::Ready) => SyncState::Ready(Arc::clone(info)),
            (SyncState::Pull(info), Event::PushPullError(failure)) => SyncState::PushPullError {
                failure,
                doc_info: Arc::clone(info),
            },

            (SyncState::PushPullError { .. }, Event::Restart) => SyncState::Init,
            (SyncState::PushPullError { doc_info, .. }, Event::Pull) => {
                SyncState::Pull(Arc::clone(doc_info))
            }
            (SyncState::PushPullError { .. }, Event::FatalError(message)) => {
                SyncState::FatalError { message }
            }

            _ => return Err(invalid),
        };
        Ok(next)
    }
}

/// One recorded transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRecord {
    pub from: StateKind,
    pub event: EventKind,
    pub to: StateKind,
}

/// Bounded trace of recent transitions, kept when the session enables debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    pub transitions: VecDeque<TransitionRecord>,
}

impl DebugInfo {
    pub fn record(&mut self, record: TransitionRecord) {
        if self.transitions.len() == MAX_TRACE {
            self.transitions.pop_front();
        }
        self.transitions.push_back(record);
    }
}

/// Mutable bookkeeping owned by the state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollabContext {
    /// Times the machine re-entered `Init` from an error branch.
    pub restart_count: u32,
    /// Consecutive `ApplyFailed` retries, drives the backoff exponent.
    pub retry_attempts: u32,
    /// Highest version the manager is known to have reached.
    pub remote_version: u64,
    /// A push failed with `ApplyFailed` and has not gone through since.
    pub failed_push: bool,
    pub debug_info: Option<DebugInfo>,
}

impl CollabContext {
    pub fn new(debug: bool) -> Self {
        Self {
            debug_info: debug.then(DebugInfo::default),
            ..Self::default()
        }
    }

    /// Forget the previous baseline. The retry counter survives so repeated
    /// failed fetches keep backing off.
    pub fn restarted(&mut self) {
        self.restart_count += 1;
        self.remote_version = 0;
    }

    /// A push went through: the backoff starts over.
    pub fn push_succeeded(&mut self) {
        self.retry_attempts = 0;
        self.failed_push = false;
    }

    /// A pull went through. While a failed push still has steps waiting the
    /// backoff keeps growing, since the next push hits the same manager.
    pub fn pull_succeeded(&mut self, steps_waiting: bool) {
        if self.failed_push && steps_waiting {
            return;
        }
        self.retry_attempts = 0;
        self.failed_push = false;
    }
}
