//! In-memory manager: the reference remote authority.
//!
//! Keeps one [`DocumentLog`] per document and answers gateway requests
//! directly, so it doubles as an in-process [`RequestGateway`] for tests and
//! as the backend of [`crate::server::SyncServer`].
//!
//! It orders submissions but does not merge them: a push that does not
//! build on the current head is refused and the client is expected to pull.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::failure::Failure;
use crate::gateway::{
    DocumentBody, GetDocument, PullBody, PullEvents, PushEvents, Reply, Request, RequestGateway,
    Response,
};
use crate::step::Step;

/// Steps retained per document before the oldest are folded away.
pub const DEFAULT_MAX_HISTORY: usize = 10_000;

/// History of one document.
#[derive(Debug, Clone)]
pub struct DocumentLog {
    /// Current text at `head`.
    text: String,
    /// Version of the oldest retained step's base.
    base_version: u64,
    /// Retained steps with their originating client, oldest first.
    steps: VecDeque<(Step, Uuid)>,
}

impl DocumentLog {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), base_version: 0, steps: VecDeque::new() }
    }

    pub fn head(&self) -> u64 {
        self.base_version + self.steps.len() as u64
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Oldest version a client can still pull from.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Append `steps` submitted at `version`, atomically.
    pub fn push(
        &mut self,
        version: u64,
        steps: &[Step],
        client_id: Uuid,
        max_history: usize,
    ) -> Result<(), Failure> {
        let head = self.head();
        if version < head {
            return Err(Failure::OutdatedVersion);
        }
        if version > head {
            return Err(Failure::InvalidVersion);
        }
        let text = steps
            .iter()
            .try_fold(self.text.clone(), |doc, step| step.apply(&doc))
            .map_err(|e| {
                log::debug!("Rejecting push from {client_id}: {e}");
                Failure::ApplyFailed
            })?;

        self.text = text;
        self.steps.extend(steps.iter().cloned().map(|step| (step, client_id)));
        while self.steps.len() > max_history {
            self.steps.pop_front();
            self.base_version += 1;
        }
        Ok(())
    }

    /// Steps after `version`.
    pub fn since(&self, version: u64) -> Result<PullBody, Failure> {
        if version > self.head() {
            return Err(Failure::InvalidVersion);
        }
        if version < self.base_version {
            return Err(Failure::HistoryNotAvailable);
        }
        let skip = (version - self.base_version) as usize;
        let (steps, client_ids) = self.steps.iter().skip(skip).cloned().unzip();
        Ok(PullBody { steps, client_ids })
    }
}

/// Manager holding every document in memory.
pub struct MemoryAuthority {
    manager_id: String,
    max_history: usize,
    documents: RwLock<HashMap<String, DocumentLog>>,
}

impl MemoryAuthority {
    pub fn new(manager_id: impl Into<String>) -> Self {
        Self::with_history(manager_id, DEFAULT_MAX_HISTORY)
    }

    pub fn with_history(manager_id: impl Into<String>, max_history: usize) -> Self {
        Self {
            manager_id: manager_id.into(),
            max_history: max_history.max(1),
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    /// Create (or reset) a document.
    pub async fn create_document(&self, name: impl Into<String>, text: impl Into<String>) {
        let name = name.into();
        log::info!("Manager {} now serves {name}", self.manager_id);
        self.documents.write().await.insert(name, DocumentLog::new(text));
    }

    pub async fn document_text(&self, name: &str) -> Option<String> {
        self.documents.read().await.get(name).map(|document| document.text().to_string())
    }

    pub async fn head_version(&self, name: &str) -> Option<u64> {
        self.documents.read().await.get(name).map(DocumentLog::head)
    }

    fn check_manager(&self, manager_id: &str) -> Result<(), Failure> {
        if manager_id == self.manager_id {
            Ok(())
        } else {
            Err(Failure::IncorrectManager)
        }
    }

    pub async fn get_document(&self, request: &GetDocument) -> Result<DocumentBody, Failure> {
        let documents = self.documents.read().await;
        let document = documents.get(&request.doc_name).ok_or(Failure::DocumentNotFound)?;
        Ok(DocumentBody {
            doc: document.text().to_string(),
            version: document.head(),
            manager_id: self.manager_id.clone(),
        })
    }

    pub async fn push_events(&self, request: &PushEvents) -> Result<(), Failure> {
        self.check_manager(&request.manager_id)?;
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&request.doc_name).ok_or(Failure::DocumentNotFound)?;
        document.push(request.version, &request.steps, request.client_id, self.max_history)?;
        log::trace!(
            "{} accepted {} steps from {}, head {}",
            request.doc_name,
            request.steps.len(),
            request.user_id,
            document.head()
        );
        Ok(())
    }

    pub async fn pull_events(&self, request: &PullEvents) -> Result<PullBody, Failure> {
        self.check_manager(&request.manager_id)?;
        let documents = self.documents.read().await;
        let document = documents.get(&request.doc_name).ok_or(Failure::DocumentNotFound)?;
        document.since(request.version)
    }
}

#[async_trait]
impl RequestGateway for MemoryAuthority {
    async fn send(&self, request: Request) -> Reply {
        match &request {
            Request::GetDocument(r) => self.get_document(r).await.map(Response::Document),
            Request::PushEvents(r) => self.push_events(r).await.map(|()| Response::Pushed),
            Request::PullEvents(r) => self.pull_events(r).await.map(Response::Pulled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(version: u64, steps: Vec<Step>, client_id: Uuid) -> PushEvents {
        PushEvents {
            version,
            steps,
            client_id,
            doc_name: "doc".into(),
            user_id: "u".into(),
            manager_id: "m1".into(),
        }
    }

    fn pull(version: u64) -> PullEvents {
        PullEvents {
            version,
            doc_name: "doc".into(),
            user_id: "u".into(),
            manager_id: "m1".into(),
        }
    }

    async fn authority() -> MemoryAuthority {
        let authority = MemoryAuthority::new("m1");
        authority.create_document("doc", "hello").await;
        authority
    }

    #[tokio::test]
    async fn test_get_document() {
        let a = authority().await;
        let body = a
            .get_document(&GetDocument { doc_name: "doc".into(), user_id: "u".into() })
            .await
            .unwrap();
        assert_eq!(body, DocumentBody { doc: "hello".into(), version: 0, manager_id: "m1".into() });

        let missing = a
            .get_document(&GetDocument { doc_name: "nope".into(), user_id: "u".into() })
            .await;
        assert_eq!(missing, Err(Failure::DocumentNotFound));
    }

    #[tokio::test]
    async fn test_push_then_pull() {
        let a = authority().await;
        let client = Uuid::new_v4();
        a.push_events(&push(0, vec![Step::insert(5, "!")], client)).await.unwrap();

        assert_eq!(a.document_text("doc").await.as_deref(), Some("hello!"));
        assert_eq!(a.head_version("doc").await, Some(1));

        let body = a.pull_events(&pull(0)).await.unwrap();
        assert_eq!(body.steps, vec![Step::insert(5, "!")]);
        assert_eq!(body.client_ids, vec![client]);
        assert!(a.pull_events(&pull(1)).await.unwrap().steps.is_empty());
    }

    #[tokio::test]
    async fn test_version_checks() {
        let a = authority().await;
        let client = Uuid::new_v4();
        a.push_events(&push(0, vec![Step::insert(0, "a")], client)).await.unwrap();

        assert_eq!(
            a.push_events(&push(0, vec![Step::insert(0, "b")], client)).await,
            Err(Failure::OutdatedVersion)
        );
        assert_eq!(
            a.push_events(&push(5, vec![Step::insert(0, "b")], client)).await,
            Err(Failure::InvalidVersion)
        );
        assert_eq!(a.pull_events(&pull(2)).await, Err(Failure::InvalidVersion));
    }

    #[tokio::test]
    async fn test_wrong_manager() {
        let a = authority().await;
        let mut request = pull(0);
        request.manager_id = "m2".into();
        assert_eq!(a.pull_events(&request).await, Err(Failure::IncorrectManager));
    }

    #[tokio::test]
    async fn test_unappliable_push_is_atomic() {
        let a = authority().await;
        let result = a
            .push_events(&push(0, vec![Step::insert(0, "ok"), Step::delete(0, 99)], Uuid::new_v4()))
            .await;
        assert_eq!(result, Err(Failure::ApplyFailed));
        assert_eq!(a.document_text("doc").await.as_deref(), Some("hello"));
        assert_eq!(a.head_version("doc").await, Some(0));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut log = DocumentLog::new("");
        let client = Uuid::new_v4();
        for v in 0..5 {
            log.push(v, &[Step::insert(0, "x")], client, 3).unwrap();
        }
        assert_eq!(log.head(), 5);
        assert_eq!(log.base_version(), 2);
        assert_eq!(log.since(1), Err(Failure::HistoryNotAvailable));
        assert_eq!(log.since(2).unwrap().steps.len(), 3);
        assert_eq!(log.text(), "xxxxx");
    }

    #[tokio::test]
    async fn test_gateway_envelope() {
        let a = authority().await;
        assert_eq!(a.send(Request::PullEvents(pull(0))).await, Ok(Response::Pulled(PullBody::default())));
        assert_eq!(
            a.send(Request::PullEvents(pull(9))).await,
            Err(Failure::InvalidVersion)
        );
    }
}
