//! Session configuration and the immutable client identity derived from it.

use std::time::Duration;
use uuid::Uuid;

/// Options recognized by a collaboration session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Unique per participant; tags every step this client pushes.
    pub client_id: Uuid,
    /// Target document identifier.
    pub doc_name: String,
    pub user_id: String,
    /// Manager the client expects to talk to (None = accept whichever answers).
    pub manager_id: Option<String>,
    /// Backoff base.
    pub retry_wait: Duration,
    /// Ceiling for the doubling `ApplyFailed` backoff.
    pub max_retry_wait: Duration,
    /// Upper bound handed to the transport; the state machine never times out itself.
    pub request_timeout: Option<Duration>,
    /// How often an idle `Ready` state re-checks for work.
    pub poll_interval: Duration,
    /// Refresh pull while idle (None = only pull after pushes and failures).
    pub pull_interval: Option<Duration>,
    /// Restarts beyond this count freeze the session (None = unlimited).
    pub max_restarts: Option<u32>,
    /// Keep a bounded transition trace in the context.
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: Uuid::new_v4(),
            doc_name: String::new(),
            user_id: String::new(),
            manager_id: None,
            retry_wait: Duration::from_millis(50),
            max_retry_wait: Duration::from_secs(30),
            request_timeout: Some(Duration::from_secs(10)),
            poll_interval: Duration::from_millis(50),
            pull_interval: Some(Duration::from_secs(1)),
            max_restarts: None,
            debug: false,
        }
    }
}

impl ClientConfig {
    pub fn new(doc_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            doc_name: doc_name.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Config for tests: short waits, no background refresh pulls, tracing on.
    pub fn for_testing(doc_name: impl Into<String>) -> Self {
        Self {
            doc_name: doc_name.into(),
            user_id: "tester".to_string(),
            retry_wait: Duration::from_millis(20),
            max_retry_wait: Duration::from_millis(500),
            request_timeout: Some(Duration::from_secs(2)),
            poll_interval: Duration::from_millis(10),
            pull_interval: None,
            debug: true,
            ..Self::default()
        }
    }

    pub fn with_manager(mut self, manager_id: impl Into<String>) -> Self {
        self.manager_id = Some(manager_id.into());
        self
    }

    /// Freeze the identity part of the config for the lifetime of a session.
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            client_id: self.client_id,
            doc_name: self.doc_name.clone(),
            user_id: self.user_id.clone(),
            manager_id: self.manager_id.clone(),
            retry_wait: self.retry_wait,
            max_retry_wait: self.max_retry_wait.max(self.retry_wait),
        }
    }
}

/// Immutable per-session identity, created once at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: Uuid,
    pub doc_name: String,
    pub user_id: String,
    /// Expected manager identity.
    pub manager_id: Option<String>,
    /// Recovery timing; the session's policy is built from these.
    pub retry_wait: Duration,
    pub max_retry_wait: Duration,
}
