//! Error recovery policy: what to do about each [`Failure`].
//!
//! | Failure             | Strategy                                   |
//! |---------------------|--------------------------------------------|
//! | ApplyFailed         | doubling backoff from `retry_wait`, Pull   |
//! | InvalidVersion      | wait `retry_wait`, Restart                 |
//! | IncorrectManager    | wait `retry_wait`, Restart                 |
//! | OutdatedVersion     | Pull immediately                           |
//! | DocumentNotFound    | FatalError immediately                     |
//! | HistoryNotAvailable | FatalError immediately                     |
//!
//! During `InitError` there is no baseline to pull onto, so the "pull"
//! strategies restart instead.

use std::time::Duration;

use crate::failure::Failure;
use crate::state::Event;

/// How a failure is handled, independent of where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Presumed transient; retry with growing delay.
    BackoffThenPull,
    /// Baseline is stale or belongs to another manager.
    WaitThenRestart,
    /// The manager simply has newer steps.
    PullNow,
    /// Unrecoverable for this session.
    Freeze,
}

impl Strategy {
    pub fn for_failure(failure: Failure) -> Self {
        match failure {
            Failure::ApplyFailed => Strategy::BackoffThenPull,
            Failure::InvalidVersion | Failure::IncorrectManager => Strategy::WaitThenRestart,
            Failure::OutdatedVersion => Strategy::PullNow,
            Failure::DocumentNotFound | Failure::HistoryNotAvailable => Strategy::Freeze,
        }
    }
}

/// Which error state the failure was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    Init,
    PushPull,
}

/// The follow-up a failure resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    /// Zero means dispatch right away.
    pub delay: Duration,
    pub event: Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub retry_wait: Duration,
    pub max_retry_wait: Duration,
}

impl RecoveryPolicy {
    pub fn new(retry_wait: Duration, max_retry_wait: Duration) -> Self {
        Self { retry_wait, max_retry_wait: max_retry_wait.max(retry_wait) }
    }

    /// `retry_wait * 2^attempt`, capped at `max_retry_wait`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.retry_wait
            .checked_mul(factor)
            .unwrap_or(self.max_retry_wait)
            .min(self.max_retry_wait)
    }

    /// Resolve `failure` into the event to dispatch and how long to wait
    /// first. `attempt` counts consecutive `ApplyFailed` retries.
    pub fn plan(&self, failure: Failure, phase: FailurePhase, attempt: u32) -> Recovery {
        let retry = match phase {
            FailurePhase::Init => Event::Restart,
            FailurePhase::PushPull => Event::Pull,
        };
        match Strategy::for_failure(failure) {
            Strategy::BackoffThenPull => Recovery { delay: self.backoff(attempt), event: retry },
            Strategy::WaitThenRestart => Recovery { delay: self.retry_wait, event: Event::Restart },
            Strategy::PullNow => Recovery { delay: Duration::ZERO, event: retry },
            Strategy::Freeze => Recovery {
                delay: Duration::ZERO,
                event: Event::FatalError(format!("synchronization stopped: {failure}")),
            },
        }
    }
}
