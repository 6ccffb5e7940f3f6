//! End-to-end behavior of the synchronization client against scripted
//! managers.
//!
//! Timing-sensitive tests run on a paused clock so backoff waits are exact.

mod common;

use std::sync::Arc;

use common::{
    init_logging, pulled_from_peer, settle, settle_idle, wait_for_calls, ScriptedGateway,
};
use logos_sync::{
    ClientConfig, CollabClient, DocumentBody, EventKind, Failure, Response, Selection, StateKind,
    Step, Surface, SyncState, TextSurface, Transaction, TransitionRecord,
};
use tokio::time::Duration;

const RETRY_WAIT: Duration = Duration::from_millis(20);

fn start(gateway: &Arc<ScriptedGateway>) -> CollabClient<TextSurface> {
    start_with(gateway, ClientConfig::for_testing("doc"))
}

fn start_with(gateway: &Arc<ScriptedGateway>, config: ClientConfig) -> CollabClient<TextSurface> {
    init_logging();
    CollabClient::start(config, TextSurface::default(), gateway.clone())
}

fn document(doc: &str, version: u64) -> Result<Response, Failure> {
    Ok(Response::Document(DocumentBody {
        doc: doc.to_string(),
        version,
        manager_id: "m1".to_string(),
    }))
}

#[tokio::test]
async fn test_initial_fetch_reaches_ready() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    let client = start(&gateway);
    settle(&client, StateKind::Ready).await;

    assert_eq!(client.with_surface(|s| s.text()).await, "hello");
    assert_eq!(client.with_surface(|s| s.version()).await, 0);
    assert_eq!(gateway.count("GetDocument"), 1);
    match client.state().await {
        SyncState::Ready(info) => assert_eq!(info.manager_id, "m1"),
        other => panic!("expected Ready, got {other:?}"),
    }
}

#[tokio::test]
async fn test_push_then_empty_pull_keeps_post_push_version() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 2));
    let client = start(&gateway);
    settle(&client, StateKind::Ready).await;

    assert!(client.apply_local(Transaction::local(vec![Step::insert(5, "!")])).await);
    settle_idle(&client).await;

    assert_eq!(client.with_surface(|s| s.text()).await, "hello!");
    assert_eq!(client.with_surface(|s| s.confirmed_text().to_string()).await, "hello!");
    assert_eq!(client.with_surface(|s| s.version()).await, 3);

    let pushes = gateway.calls_named("PushEvents");
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].version(), Some(2));
    assert_eq!(pushes[0].pushed_steps(), Some(&[Step::insert(5, "!")][..]));
    assert_eq!(gateway.calls_named("PullEvents")[0].version(), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_outdated_pull_retries_without_backoff() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    gateway.script_pull(Err(Failure::OutdatedVersion));
    let client = start(&gateway);
    settle(&client, StateKind::Ready).await;

    assert!(client.apply_local(Transaction::local(vec![Step::insert(0, ">")])).await);
    settle_idle(&client).await;

    let pulls = gateway.calls_named("PullEvents");
    assert_eq!(pulls.len(), 2);
    assert!(pulls[1].at - pulls[0].at < RETRY_WAIT, "pull retried after {:?}", pulls[1].at - pulls[0].at);

    let trace = client.context().await.debug_info.unwrap();
    assert!(trace.transitions.contains(&TransitionRecord {
        from: StateKind::PushPullError,
        event: EventKind::Pull,
        to: StateKind::Pull,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_version_restarts_after_retry_wait() {
    let gateway = Arc::new(ScriptedGateway::new("unused", 0));
    gateway
        .script_document(document("hello", 0))
        .script_document(document("hello world", 5))
        .script_push(Err(Failure::InvalidVersion));
    let client = start(&gateway);
    settle(&client, StateKind::Ready).await;

    assert!(client.apply_local(Transaction::local(vec![Step::insert(5, "!")])).await);
    wait_for_calls(&gateway, "GetDocument", 2).await;
    settle_idle(&client).await;

    let fetches = gateway.calls_named("GetDocument");
    let pushes = gateway.calls_named("PushEvents");
    assert_eq!(fetches.len(), 2);
    assert!(fetches[1].at - pushes[0].at >= RETRY_WAIT);

    // the unconfirmed edit survives the restart and goes out on the corrected baseline
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[1].version(), Some(5));
    assert_eq!(client.with_surface(|s| s.text()).await, "hello! world");
    assert_eq!(client.with_surface(|s| s.version()).await, 6);
    assert_eq!(client.context().await.restart_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_document_is_fatal_and_silent() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    gateway.script_document(Err(Failure::DocumentNotFound));
    let client = start(&gateway);
    settle(&client, StateKind::FatalError).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(gateway.calls().len(), 1);
    assert_eq!(gateway.count("GetDocument"), 1);

    assert!(!client.apply_local(Transaction::local(vec![Step::insert(0, "x")])).await);
    assert!(!client.restart().await);
    match client.state().await {
        SyncState::FatalError { message } => assert!(message.contains("document not found")),
        other => panic!("expected FatalError, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_apply_failed_push_keeps_local_edits() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    gateway.script_push(Err(Failure::ApplyFailed));
    let client = start(&gateway);
    settle(&client, StateKind::Ready).await;

    assert!(client.apply_local(Transaction::local(vec![Step::insert(5, "!")])).await);
    settle(&client, StateKind::PushPullError).await;

    // still editable while waiting out the backoff
    assert!(client.apply_local(Transaction::local(vec![Step::insert(0, ">")])).await);
    settle_idle(&client).await;

    let pushes = gateway.calls_named("PushEvents");
    assert_eq!(pushes.len(), 2);
    assert!(pushes[1].at - pushes[0].at >= RETRY_WAIT);
    assert_eq!(
        pushes[1].pushed_steps(),
        Some(&[Step::insert(5, "!"), Step::insert(0, ">")][..])
    );
    assert_eq!(client.with_surface(|s| s.text()).await, ">hello!");
    assert_eq!(client.with_surface(|s| s.version()).await, 2);
    assert_eq!(client.context().await.retry_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_push_failures_back_off() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    for _ in 0..4 {
        gateway.script_push(Err(Failure::ApplyFailed));
    }
    let client = start(&gateway);
    settle(&client, StateKind::Ready).await;

    assert!(client.apply_local(Transaction::local(vec![Step::insert(5, "!")])).await);
    wait_for_calls(&gateway, "PushEvents", 5).await;
    settle_idle(&client).await;

    let pushes = gateway.calls_named("PushEvents");
    assert_eq!(pushes.len(), 5);
    for (i, pair) in pushes.windows(2).enumerate() {
        let expected = RETRY_WAIT * 2u32.pow(i as u32);
        let gap = pair[1].at - pair[0].at;
        assert!(gap >= expected && gap < expected * 2, "gap {i} was {gap:?}");
    }
    // every failed push was followed by a successful pull
    assert_eq!(gateway.count("PullEvents"), 5);
    assert_eq!(client.with_surface(|s| s.text()).await, "hello!");
    assert_eq!(client.context().await.retry_attempts, 0);
}

#[tokio::test]
async fn test_outdated_push_rebases_over_remote_steps() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    gateway
        .script_push(Err(Failure::OutdatedVersion))
        .script_pull(pulled_from_peer(vec![Step::insert(0, "ab")]));
    let client = start(&gateway);
    settle(&client, StateKind::Ready).await;

    assert!(client.apply_local(Transaction::local(vec![Step::insert(5, "!")])).await);
    settle_idle(&client).await;

    let pushes = gateway.calls_named("PushEvents");
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[1].version(), Some(1));
    assert_eq!(pushes[1].pushed_steps(), Some(&[Step::insert(7, "!")][..]));
    assert_eq!(client.with_surface(|s| s.text()).await, "abhello!");
    assert_eq!(client.with_surface(|s| s.version()).await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_edits_gated_until_document_arrives() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0).with_document_delay(Duration::from_secs(1)));
    let client = start(&gateway);

    assert_eq!(client.state_kind(), StateKind::Init);
    assert!(!client.apply_local(Transaction::local(vec![Step::insert(0, "x")])).await);
    // selection changes are never gated
    assert!(client.apply_local(Transaction::select(Selection::All)).await);

    settle(&client, StateKind::Ready).await;
    assert!(client.apply_local(Transaction::local(vec![Step::insert(0, "x")])).await);
    settle_idle(&client).await;
    assert_eq!(client.with_surface(|s| s.text()).await, "xhello");
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetches_back_off_and_recover() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    for _ in 0..3 {
        gateway.script_document(Err(Failure::ApplyFailed));
    }
    let client = start(&gateway);
    settle(&client, StateKind::Ready).await;

    let fetches = gateway.calls_named("GetDocument");
    assert_eq!(fetches.len(), 4);
    for (i, pair) in fetches.windows(2).enumerate() {
        let expected = RETRY_WAIT * 2u32.pow(i as u32);
        let gap = pair[1].at - pair[0].at;
        assert!(gap >= expected && gap < expected * 2, "gap {i} was {gap:?}");
    }
    let context = client.context().await;
    assert_eq!(context.restart_count, 3);
    assert_eq!(context.retry_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_manager_gives_up_after_max_restarts() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    let config = ClientConfig {
        max_restarts: Some(2),
        ..ClientConfig::for_testing("doc").with_manager("m2")
    };
    let client = start_with(&gateway, config);
    settle(&client, StateKind::FatalError).await;

    assert_eq!(gateway.count("GetDocument"), 3);
    assert_eq!(client.context().await.restart_count, 2);
}

#[tokio::test]
async fn test_echoed_push_after_lost_response_is_not_duplicated() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    let client = start(&gateway);
    settle(&client, StateKind::Ready).await;
    let me = client.client_info().client_id;

    // The manager accepted the push but the answer was lost in transit.
    gateway
        .script_push(Err(Failure::ApplyFailed))
        .script_pull(Ok(Response::Pulled(logos_sync::PullBody {
            steps: vec![Step::insert(5, "!")],
            client_ids: vec![me],
        })));

    assert!(client.apply_local(Transaction::local(vec![Step::insert(5, "!")])).await);
    settle_idle(&client).await;

    assert_eq!(gateway.count("PushEvents"), 1);
    assert_eq!(client.with_surface(|s| s.text()).await, "hello!");
    assert_eq!(client.with_surface(|s| s.version()).await, 1);
}

#[tokio::test]
async fn test_unappliable_remote_steps_restart_the_session() {
    let gateway = Arc::new(ScriptedGateway::new("hi", 0));
    gateway
        .script_pull(pulled_from_peer(vec![Step::delete(0, 50)]))
        .script_document(document("hi", 0))
        .script_document(document("fresh", 4));
    let client = start(&gateway);
    settle(&client, StateKind::Ready).await;

    assert!(client.apply_local(Transaction::local(vec![Step::insert(2, "!")])).await);
    wait_for_calls(&gateway, "GetDocument", 2).await;
    settle(&client, StateKind::Ready).await;

    assert_eq!(gateway.count("GetDocument"), 2);
    assert_eq!(client.context().await.restart_count, 1);
}

#[tokio::test]
async fn test_user_restart_from_error_state() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    gateway.script_push(Err(Failure::IncorrectManager));
    let config = ClientConfig {
        retry_wait: Duration::from_secs(3600),
        max_retry_wait: Duration::from_secs(3600),
        ..ClientConfig::for_testing("doc")
    };
    let client = start_with(&gateway, config);
    settle(&client, StateKind::Ready).await;
    assert!(!client.restart().await);

    assert!(client.apply_local(Transaction::local(vec![Step::insert(0, "x")])).await);
    settle(&client, StateKind::PushPullError).await;

    assert!(client.restart().await);
    settle_idle(&client).await;
    assert_eq!(gateway.count("GetDocument"), 2);
    assert_eq!(client.with_surface(|s| s.text()).await, "xhello");
}

#[tokio::test]
async fn test_status_watch_reports_fatal_banner() {
    let gateway = Arc::new(ScriptedGateway::new("hello", 0));
    gateway.script_document(Err(Failure::HistoryNotAvailable));
    let client = start(&gateway);
    let mut status = client.subscribe();

    let seen = tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|k| *k == StateKind::FatalError),
    )
    .await
    .unwrap()
    .map(|k| *k)
    .unwrap();
    assert_eq!(seen, StateKind::FatalError);
}
