//! Collaboration client: drives the synchronization state machine against a
//! request gateway and keeps one local surface in step with the manager.
//!
//! ```text
//!  local edits ──► admission ──► Surface ◄── applier ◄──┐
//!                                   ▲                   │
//!                                   │ lock              │ results
//!                               ┌───┴────┐   actions  ┌─┴──────────────┐
//!  events ────────────────────► │  Core  │ ─────────► │ RequestGateway │
//!                               │ state  │            └────────────────┘
//!                               │ ctx    │
//!                               └────────┘
//! ```
//!
//! Every state owns one entry action, spawned on the tokio runtime when the
//! state is entered. The action awaits the gateway (or a backoff timer),
//! then re-locks the core and, if its cancellation token is still live,
//! mutates the surface and dispatches exactly one follow-up event.
//!
//! Transitions cancel the previous state's token while holding the core
//! lock, so an action that observes a live token under the lock is
//! guaranteed to still be current: superseded actions never dispatch and
//! never touch the surface.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use log::{debug, error, info, trace, warn};
use tokio::sync::{watch, Mutex, MutexGuard, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::admission;
use crate::applier;
use crate::config::{ClientConfig, ClientInfo};
use crate::failure::Failure;
use crate::gateway::{GetDocument, PullEvents, PushEvents, RequestGateway};
use crate::policy::{FailurePhase, RecoveryPolicy};
use crate::state::{CollabContext, DocInfo, Event, StateKind, SyncState, TransitionRecord};
use crate::surface::{Surface, Transaction};

/// Everything the state machine owns exclusively, behind one lock.
struct Core<S> {
    state: SyncState,
    context: CollabContext,
    surface: S,
    /// Scoped to the current entry into `state`.
    cancel: CancellationToken,
}

/// Timing knobs taken from the config.
#[derive(Debug, Clone, Copy)]
struct Timing {
    poll_interval: Duration,
    pull_interval: Option<Duration>,
    max_restarts: Option<u32>,
}

struct Shared<S> {
    info: Arc<ClientInfo>,
    gateway: Arc<dyn RequestGateway>,
    policy: RecoveryPolicy,
    timing: Timing,
    core: Mutex<Core<S>>,
    /// Parent of every per-state token; cancelled on shutdown.
    session: CancellationToken,
    /// Wakes an idle `Ready` action after a local edit.
    wake: Notify,
    status: watch::Sender<StateKind>,
}

/// A running collaboration session for one document.
pub struct CollabClient<S: Surface> {
    shared: Arc<Shared<S>>,
}

impl<S: Surface> CollabClient<S> {
    /// Start a session in `Init` and kick off the initial document fetch.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: ClientConfig, surface: S, gateway: Arc<dyn RequestGateway>) -> Self {
        let info = Arc::new(config.client_info());
        let session = CancellationToken::new();
        let cancel = session.child_token();
        let (status, _) = watch::channel(StateKind::Init);

        let shared = Arc::new(Shared {
            policy: RecoveryPolicy::new(info.retry_wait, info.max_retry_wait),
            timing: Timing {
                poll_interval: config.poll_interval,
                pull_interval: config.pull_interval,
                max_restarts: config.max_restarts,
            },
            info,
            gateway,
            core: Mutex::new(Core {
                state: SyncState::Init,
                context: CollabContext::new(config.debug),
                surface,
                cancel: cancel.clone(),
            }),
            session,
            wake: Notify::new(),
            status,
        });

        info!(
            "Collaboration session started: doc={} client={}",
            shared.info.doc_name, shared.info.client_id
        );
        tokio::spawn(Arc::clone(&shared).run_action(SyncState::Init, cancel));
        Self { shared }
    }

    pub fn client_info(&self) -> &ClientInfo {
        &self.shared.info
    }

    /// Current state discriminant without taking the lock.
    pub fn state_kind(&self) -> StateKind {
        *self.shared.status.borrow()
    }

    /// Watch state changes (e.g. to show a permanent failure banner).
    pub fn subscribe(&self) -> watch::Receiver<StateKind> {
        self.shared.status.subscribe()
    }

    pub async fn state(&self) -> SyncState {
        self.shared.core.lock().await.state.clone()
    }

    pub async fn context(&self) -> CollabContext {
        self.shared.core.lock().await.context.clone()
    }

    /// Read the surface.
    pub async fn with_surface<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.shared.core.lock().await.surface)
    }

    /// Submit an editor transaction. Returns false when the transaction was
    /// refused (edit gated by the current state) or did not fit the document.
    pub async fn apply_local(&self, transaction: Transaction) -> bool {
        let mut core = self.shared.core.lock().await;
        let state = core.state.kind();
        if !admission::admits(state, &transaction) {
            debug!("Refused local edit while {state:?}");
            return false;
        }
        if core.surface.is_destroyed() {
            return false;
        }
        if let Err(e) = core.surface.apply_transaction(&transaction) {
            warn!("Local transaction does not fit the document: {e}");
            return false;
        }
        drop(core);

        if transaction.changes_document() {
            self.shared.wake.notify_one();
        }
        true
    }

    /// Restart synchronization from scratch. Only valid from an error state;
    /// returns whether the restart was dispatched.
    pub async fn restart(&self) -> bool {
        let mut core = self.shared.core.lock().await;
        match core.state.kind() {
            StateKind::InitError | StateKind::PushPullError => {
                info!("Restart requested by user");
                self.shared.dispatch(&mut core, Event::Restart);
                true
            }
            other => {
                debug!("Ignoring restart request while {other:?}");
                false
            }
        }
    }

    /// Stop synchronizing and tear the surface down.
    pub async fn shutdown(&self) {
        let mut core = self.shared.core.lock().await;
        self.shared.session.cancel();
        core.surface.destroy();
        info!("Collaboration session for {} shut down", self.shared.info.doc_name);
    }
}

impl<S: Surface> Drop for CollabClient<S> {
    fn drop(&mut self) {
        self.shared.session.cancel();
    }
}

impl<S: Surface> Shared<S> {
    /// Apply `event` to the current state and spawn the new state's action.
    ///
    /// Must be called with the core locked.
    fn dispatch(self: &Arc<Self>, core: &mut Core<S>, event: Event) {
        if self.session.is_cancelled() {
            return;
        }
        let event = self.limit_restarts(core, event);
        let from = core.state.kind();
        let event_kind = event.kind();

        let next = match core.state.transition(event) {
            Ok(next) => next,
            Err(e) => {
                error!("Dropping event: {e}");
                return;
            }
        };
        let to = next.kind();
        debug!("{from:?} --{event_kind:?}--> {to:?}");

        if to == StateKind::Init {
            core.context.restarted();
            info!("Restarting synchronization (restart #{})", core.context.restart_count);
        }
        if let Some(trace) = core.context.debug_info.as_mut() {
            trace.record(TransitionRecord { from, event: event_kind, to });
        }

        core.cancel.cancel();
        core.cancel = self.session.child_token();
        core.state = next;
        self.status.send_replace(to);

        tokio::spawn(Arc::clone(self).run_action(core.state.clone(), core.cancel.clone()));
    }

    fn limit_restarts(&self, core: &Core<S>, event: Event) -> Event {
        match (event, self.timing.max_restarts) {
            (Event::Restart, Some(max)) if core.context.restart_count >= max => {
                Event::FatalError(format!("gave up after {max} restarts"))
            }
            (event, _) => event,
        }
    }

    /// Lock the core unless `token` was cancelled in the meantime.
    async fn lock_current(&self, token: &CancellationToken) -> Option<MutexGuard<'_, Core<S>>> {
        let core = self.core.lock().await;
        if token.is_cancelled() {
            trace!("Superseded action dropped its result");
            return None;
        }
        Some(core)
    }

    /// Finish an action: under the lock, unless superseded, run `f` and
    /// dispatch the event it yields.
    async fn complete<F>(self: &Arc<Self>, token: &CancellationToken, f: F)
    where
        F: FnOnce(&mut Core<S>) -> Event + Send,
    {
        if let Some(mut core) = self.lock_current(token).await {
            let event = f(&mut *core);
            self.dispatch(&mut core, event);
        }
    }

    /// Entry action of `state`.
    fn run_action(self: Arc<Self>, state: SyncState, token: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match state {
                SyncState::Init => self.fetch_document(&token).await,
                SyncState::InitDoc(doc_info) => {
                    self.complete(&token, move |core| {
                        applier::apply_initial_document(
                            &mut core.surface,
                            &doc_info.initial_doc,
                            doc_info.initial_version,
                            doc_info.initial_selection,
                        );
                        core.context.remote_version = doc_info.initial_version;
                        core.context.retry_attempts = 0;
                        core.context.failed_push = false;
                        Event::Ready
                    })
                    .await
                }
                SyncState::InitError { failure } => {
                    self.recover(failure, FailurePhase::Init, &token).await
                }
                SyncState::Ready(_) => self.idle(&token).await,
                SyncState::Push(doc_info) => self.push(&doc_info, &token).await,
                SyncState::Pull(doc_info) => self.pull(&doc_info, &token).await,
                SyncState::PushPullError { failure, .. } => {
                    self.recover(failure, FailurePhase::PushPull, &token).await
                }
                SyncState::FatalError { message } => {
                    error!(
                        "Synchronization of {} permanently halted: {message}; reload required",
                        self.info.doc_name
                    );
                }
            }
        })
    }

    async fn fetch_document(self: &Arc<Self>, token: &CancellationToken) {
        let request = GetDocument {
            doc_name: self.info.doc_name.clone(),
            user_id: self.info.user_id.clone(),
        };
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = self.gateway.get_document(request) => result,
        };

        let event = match result {
            Ok(body) => match &self.info.manager_id {
                Some(expected) if *expected != body.manager_id => {
                    warn!("Expected manager {expected}, got {}", body.manager_id);
                    Event::InitError(Failure::IncorrectManager)
                }
                _ => Event::InitDoc(Arc::new(DocInfo {
                    initial_doc: body.doc,
                    initial_version: body.version,
                    initial_selection: None,
                    manager_id: body.manager_id,
                })),
            },
            Err(failure) => {
                warn!("Fetching {} failed: {failure}", self.info.doc_name);
                Event::InitError(failure)
            }
        };
        self.complete(token, move |_| event).await;
    }

    /// Decide what `Ready` should do next, if anything.
    fn next_step(core: &Core<S>, refresh_due: bool) -> Option<Event> {
        if core.surface.is_destroyed() {
            return None;
        }
        // Only fires for surfaces whose version can trail the manager's
        // acknowledgements; `TextSurface` catches up inside the pull itself.
        if core.surface.version() < core.context.remote_version {
            Some(Event::Pull)
        } else if core.surface.has_sendable() {
            Some(Event::Push)
        } else if refresh_due {
            Some(Event::Pull)
        } else {
            None
        }
    }

    async fn idle(self: &Arc<Self>, token: &CancellationToken) {
        let entered = Instant::now();
        loop {
            {
                let Some(mut core) = self.lock_current(token).await else {
                    return;
                };
                let refresh_due = self
                    .timing
                    .pull_interval
                    .is_some_and(|interval| entered.elapsed() >= interval);
                if let Some(event) = Self::next_step(&core, refresh_due) {
                    self.dispatch(&mut core, event);
                    return;
                }
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.timing.poll_interval) => {}
            }
        }
    }

    async fn push(self: &Arc<Self>, doc_info: &DocInfo, token: &CancellationToken) {
        let sendable = {
            let Some(core) = self.lock_current(token).await else {
                return;
            };
            core.surface.sendable_steps()
        };
        let Some(sendable) = sendable else {
            self.complete(token, |_| Event::Ready).await;
            return;
        };

        let count = sendable.steps.len();
        let version = sendable.version;
        let request = PushEvents {
            version,
            steps: sendable.steps,
            client_id: self.info.client_id,
            doc_name: self.info.doc_name.clone(),
            user_id: self.info.user_id.clone(),
            manager_id: doc_info.manager_id.clone(),
        };
        trace!("Pushing {count} steps at version {version}");
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = self.gateway.push_events(request) => result,
        };

        self.complete(token, move |core| match result {
            Ok(()) => match core.surface.confirm_steps(count) {
                Ok(()) => {
                    core.context.push_succeeded();
                    let confirmed = core.surface.version();
                    core.context.remote_version = core.context.remote_version.max(confirmed);
                    Event::Pull
                }
                Err(e) => {
                    error!("Pushed steps vanished from the surface: {e}");
                    Event::PushPullError(Failure::InvalidVersion)
                }
            },
            Err(failure) => {
                warn!("Push at version {version} failed: {failure}");
                if failure == Failure::ApplyFailed {
                    core.context.failed_push = true;
                }
                Event::PushPullError(failure)
            }
        })
        .await;
    }

    async fn pull(self: &Arc<Self>, doc_info: &DocInfo, token: &CancellationToken) {
        let version = {
            let Some(core) = self.lock_current(token).await else {
                return;
            };
            core.surface.version()
        };
        let request = PullEvents {
            version,
            doc_name: self.info.doc_name.clone(),
            user_id: self.info.user_id.clone(),
            manager_id: doc_info.manager_id.clone(),
        };
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = self.gateway.pull_events(request) => result,
        };

        let own_client = self.info.client_id;
        self.complete(token, move |core| match result {
            Ok(body) => {
                match applier::apply_remote_steps(&mut core.surface, &body.steps, &body.client_ids, own_client) {
                    Ok(applied) => {
                        core.context.pull_succeeded(core.surface.has_sendable());
                        let reached = version + applied as u64;
                        core.context.remote_version = core.context.remote_version.max(reached);
                        Event::Ready
                    }
                    Err(e) => {
                        // Our baseline no longer matches the manager's history.
                        warn!("Remote steps after version {version} do not apply: {e}");
                        Event::PushPullError(Failure::InvalidVersion)
                    }
                }
            }
            Err(failure) => {
                warn!("Pull at version {version} failed: {failure}");
                Event::PushPullError(failure)
            }
        })
        .await;
    }

    async fn recover(self: &Arc<Self>, failure: Failure, phase: FailurePhase, token: &CancellationToken) {
        let attempt = {
            let Some(mut core) = self.lock_current(token).await else {
                return;
            };
            let attempt = core.context.retry_attempts;
            if failure == Failure::ApplyFailed {
                core.context.retry_attempts = attempt.saturating_add(1);
            }
            attempt
        };

        let recovery = self.policy.plan(failure, phase, attempt);
        if !recovery.delay.is_zero() {
            debug!("Recovering from {failure} in {:?}", recovery.delay);
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(recovery.delay) => {}
            }
        }
        self.complete(token, move |_| recovery.event).await;
    }
}
