//! Request gateway: the request/response boundary to the manager.
//!
//! ```text
//! GetDocument { doc_name, user_id }                          → Document { doc, version, manager_id }
//! PushEvents  { version, steps, client_id, doc_name, user_id,
//!               manager_id }                                 → Pushed
//! PullEvents  { version, doc_name, user_id, manager_id }     → Pulled { steps, client_ids }
//! ```
//!
//! A gateway always resolves: failures come back as `Err(Failure)`, never
//! as panics or untyped errors. How the request travels is up to the
//! implementation ([`crate::transport::WsGateway`] over WebSocket,
//! [`crate::authority::MemoryAuthority`] in-process).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::failure::Failure;
use crate::step::Step;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDocument {
    pub doc_name: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvents {
    /// Version the steps build on.
    pub version: u64,
    pub steps: Vec<Step>,
    pub client_id: Uuid,
    pub doc_name: String,
    pub user_id: String,
    pub manager_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullEvents {
    /// Return every step after this version.
    pub version: u64,
    pub doc_name: String,
    pub user_id: String,
    pub manager_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    GetDocument(GetDocument),
    PushEvents(PushEvents),
    PullEvents(PullEvents),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetDocument(_) => "GetDocument",
            Request::PushEvents(_) => "PushEvents",
            Request::PullEvents(_) => "PullEvents",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentBody {
    pub doc: String,
    pub version: u64,
    pub manager_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullBody {
    pub steps: Vec<Step>,
    /// Originating client of each step, index-aligned with `steps`.
    pub client_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Document(DocumentBody),
    Pushed,
    Pulled(PullBody),
}

/// `ok` / `body` envelope of every gateway call.
pub type Reply = Result<Response, Failure>;

/// Sends one tagged request to the manager.
#[async_trait]
pub trait RequestGateway: Send + Sync {
    async fn send(&self, request: Request) -> Reply;
}

fn mismatched(request: &'static str, response: &Response) -> Failure {
    log::error!("Gateway answered {request} with {response:?}");
    Failure::ApplyFailed
}

impl dyn RequestGateway {
    pub async fn get_document(&self, request: GetDocument) -> Result<DocumentBody, Failure> {
        match self.send(Request::GetDocument(request)).await? {
            Response::Document(body) => Ok(body),
            other => Err(mismatched("GetDocument", &other)),
        }
    }

    pub async fn push_events(&self, request: PushEvents) -> Result<(), Failure> {
        match self.send(Request::PushEvents(request)).await? {
            Response::Pushed => Ok(()),
            other => Err(mismatched("PushEvents", &other)),
        }
    }

    pub async fn pull_events(&self, request: PullEvents) -> Result<PullBody, Failure> {
        match self.send(Request::PullEvents(request)).await? {
            Response::Pulled(body) => Ok(body),
            other => Err(mismatched("PullEvents", &other)),
        }
    }
}
