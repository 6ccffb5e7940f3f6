//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use logos_sync::{
    CollabClient, DocumentBody, PullBody, Reply, Request, RequestGateway, Response, StateKind,
    Step, Surface,
};
use tokio::time::{timeout, Duration, Instant};
use uuid::Uuid;

/// One request observed by a [`ScriptedGateway`].
#[derive(Debug, Clone)]
pub struct Call {
    pub request: Request,
    pub at: Instant,
}

impl Call {
    pub fn name(&self) -> &'static str {
        self.request.name()
    }

    /// Version carried by a push or pull.
    pub fn version(&self) -> Option<u64> {
        match &self.request {
            Request::GetDocument(_) => None,
            Request::PushEvents(push) => Some(push.version),
            Request::PullEvents(pull) => Some(pull.version),
        }
    }

    pub fn pushed_steps(&self) -> Option<&[Step]> {
        match &self.request {
            Request::PushEvents(push) => Some(&push.steps),
            _ => None,
        }
    }
}

/// Gateway answering from per-request scripts.
///
/// Each request kind pops its next scripted reply; an exhausted script falls
/// back to: the default document, `Pushed`, and an empty pull.
pub struct ScriptedGateway {
    document: DocumentBody,
    document_delay: Duration,
    documents: Mutex<VecDeque<Reply>>,
    pushes: Mutex<VecDeque<Reply>>,
    pulls: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedGateway {
    /// Serves `doc` at `version` from manager "m1".
    pub fn new(doc: &str, version: u64) -> Self {
        Self {
            document: DocumentBody {
                doc: doc.to_string(),
                version,
                manager_id: "m1".to_string(),
            },
            document_delay: Duration::ZERO,
            documents: Mutex::new(VecDeque::new()),
            pushes: Mutex::new(VecDeque::new()),
            pulls: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Hold every `GetDocument` answer back by `delay`.
    pub fn with_document_delay(mut self, delay: Duration) -> Self {
        self.document_delay = delay;
        self
    }

    pub fn script_document(&self, reply: Reply) -> &Self {
        self.documents.lock().unwrap().push_back(reply);
        self
    }

    pub fn script_push(&self, reply: Reply) -> &Self {
        self.pushes.lock().unwrap().push_back(reply);
        self
    }

    pub fn script_pull(&self, reply: Reply) -> &Self {
        self.pulls.lock().unwrap().push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|call| call.name() == name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls_named(name).len()
    }
}

#[async_trait]
impl RequestGateway for ScriptedGateway {
    async fn send(&self, request: Request) -> Reply {
        self.calls.lock().unwrap().push(Call { request: request.clone(), at: Instant::now() });
        match request {
            Request::GetDocument(_) => {
                if !self.document_delay.is_zero() {
                    tokio::time::sleep(self.document_delay).await;
                }
                let scripted = self.documents.lock().unwrap().pop_front();
                scripted.unwrap_or_else(|| Ok(Response::Document(self.document.clone())))
            }
            Request::PushEvents(_) => {
                let scripted = self.pushes.lock().unwrap().pop_front();
                scripted.unwrap_or(Ok(Response::Pushed))
            }
            Request::PullEvents(_) => {
                let scripted = self.pulls.lock().unwrap().pop_front();
                scripted.unwrap_or_else(|| Ok(Response::Pulled(PullBody::default())))
            }
        }
    }
}

/// A pull answer carrying steps from some other participant.
pub fn pulled_from_peer(steps: Vec<Step>) -> Reply {
    let peer = Uuid::new_v4();
    let client_ids = vec![peer; steps.len()];
    Ok(Response::Pulled(PullBody { steps, client_ids }))
}

/// Wait until the client reaches `kind`.
pub async fn settle<S: Surface>(client: &CollabClient<S>, kind: StateKind) {
    let mut rx = client.subscribe();
    timeout(Duration::from_secs(5), rx.wait_for(|k| *k == kind))
        .await
        .unwrap_or_else(|_| panic!("{kind:?} not reached, stuck in {:?}", client.state_kind()))
        .unwrap();
}

/// Wait until the client is idle in `Ready` with nothing left to send.
pub async fn settle_idle<S: Surface>(client: &CollabClient<S>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if client.state_kind() == StateKind::Ready
            && !client.with_surface(|s| s.has_sendable()).await
        {
            return;
        }
        assert!(Instant::now() < deadline, "client never went idle: {:?}", client.state_kind());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Install the test logger once per binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Wait until the gateway has seen `n` requests called `name`.
pub async fn wait_for_calls(gateway: &ScriptedGateway, name: &str, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while gateway.count(name) < n {
        assert!(Instant::now() < deadline, "only {} {name} calls", gateway.count(name));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
