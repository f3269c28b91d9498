//! Unit tests for the queue drain
//!
//! Downloads are replaced by a scripted adapter so that completion order, failures
//! and session assignment can be controlled exactly. HTTP-level behaviour is covered
//! by the integration tests in the top-level tests directory.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::app::client::{ClientConfig, Session};
use crate::app::models::TrackedSource;
use crate::app::store::{MemoryStore, SourceStore};
use crate::errors::DownloadResult;

/// Adapter whose per-item delay and outcome are fixed up front
#[derive(Default)]
struct ScriptedAdapter {
    delays: HashMap<String, Duration>,
    failures: HashSet<String>,
    busy_sessions: std::sync::Mutex<HashSet<usize>>,
    overlaps: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    fn delay(mut self, item_id: &str, millis: u64) -> Self {
        self.delays
            .insert(item_id.to_string(), Duration::from_millis(millis));
        self
    }

    fn fail(mut self, item_id: &str) -> Self {
        self.failures.insert(item_id.to_string());
        self
    }
}

#[async_trait]
impl ContentAdapter for ScriptedAdapter {
    async fn download(&self, session: &EgressSession, item: &QueueItem) -> DownloadResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.busy_sessions.lock().unwrap().insert(session.id()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let delay = self.delays.get(&item.item_id).copied().unwrap_or_default();
        tokio::time::sleep(delay).await;

        self.busy_sessions.lock().unwrap().remove(&session.id());
        if self.failures.contains(&item.item_id) {
            return Err(DownloadError::Blocked {
                status: 403,
                url: item.file_uri.clone(),
            });
        }
        Ok(())
    }
}

fn pool_of(n: usize) -> Arc<EgressPool> {
    let sessions = (0..n)
        .map(|_| Session::new(ClientConfig::default()).unwrap())
        .collect();
    Arc::new(EgressPool::from_sessions(sessions))
}

fn items(ids: &[&str]) -> Vec<QueueItem> {
    ids.iter()
        .map(|id| QueueItem::new(*id, format!("https://example.com/{}.bin", id), format!("{}.bin", id)))
        .collect()
}

async fn store_and_cursor() -> (Arc<MemoryStore>, ProgressCursor) {
    let store = Arc::new(MemoryStore::with_sources([TrackedSource::new(
        "feed",
        "json_feed",
        "https://example.com/feed",
    )]));
    let cursor = ProgressCursor::load(store.clone(), "feed").await.unwrap();
    (store, cursor)
}

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig::default().with_poll_interval(Duration::from_millis(5))
}

/// Test that a failed item keeps the cursor before it
///
/// Verifies the run reports the failure and the later, successful item
/// is not committed past the gap.
#[tokio::test]
async fn test_failed_middle_item_pins_cursor_to_first() {
    let (store, cursor) = store_and_cursor().await;
    let pool = pool_of(2);
    // A and C finish quickly, B fails after both
    let adapter = Arc::new(
        ScriptedAdapter::default()
            .delay("A", 10)
            .delay("B", 80)
            .delay("C", 20)
            .fail("B"),
    );

    let coordinator = DownloadCoordinator::new(fast_config(), pool.clone());
    let err = coordinator
        .run(items(&["A", "B", "C"]), adapter.clone(), cursor)
        .await
        .unwrap_err();

    match err {
        CoordinatorError::ItemFailed { item_id, .. } => assert_eq!(item_id, "B"),
        other => panic!("Expected ItemFailed, got {:?}", other),
    }
    assert_eq!(store.get_cursor("feed").await.unwrap(), "A");
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
}

/// Test that out-of-order completions still end on the last item
#[tokio::test]
async fn test_out_of_order_completion_commits_full_prefix() {
    let (store, cursor) = store_and_cursor().await;
    let pool = pool_of(3);
    let adapter = Arc::new(
        ScriptedAdapter::default()
            .delay("1", 60)
            .delay("2", 5)
            .delay("3", 5),
    );

    let summary = DownloadCoordinator::new(fast_config(), pool.clone())
        .run(items(&["1", "2", "3"]), adapter, cursor)
        .await
        .unwrap();

    assert_eq!(summary.cursor, "3");
    assert_eq!(summary.completed, 3);
    assert_eq!(store.get_cursor("feed").await.unwrap(), "3");
}

/// Test that no session is handed two items at once
#[tokio::test]
async fn test_sessions_never_double_booked() {
    let (_store, cursor) = store_and_cursor().await;
    let pool = pool_of(3);
    let mut adapter = ScriptedAdapter::default();
    let ids: Vec<String> = (1..=12).map(|i| i.to_string()).collect();
    for (i, id) in ids.iter().enumerate() {
        adapter = adapter.delay(id, 5 + (i as u64 * 7) % 20);
    }
    let adapter = Arc::new(adapter);
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    let summary = DownloadCoordinator::new(fast_config(), pool.clone())
        .run(items(&id_refs), adapter.clone(), cursor)
        .await
        .unwrap();

    assert_eq!(adapter.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(summary.cursor, "12");
    assert_eq!(pool.states().await, vec![crate::app::egress::SessionState::Free; 3]);
}

/// Test simple mode commit timing
#[tokio::test]
async fn test_simple_mode_commits_once_at_end() {
    let (store, cursor) = store_and_cursor().await;
    let (tx, mut rx) = mpsc::channel(64);
    let config = fast_config().with_mode(DispatchMode::Simple);

    let summary = DownloadCoordinator::new(config, pool_of(2))
        .with_events(tx)
        .run(items(&["1", "2", "3"]), Arc::new(ScriptedAdapter::default()), cursor)
        .await
        .unwrap();

    assert_eq!(summary.cursor, "3");
    assert_eq!(store.get_cursor("feed").await.unwrap(), "3");

    let mut commits = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ItemEvent::Committed { item_id } = event {
            commits.push(item_id);
        }
    }
    assert_eq!(commits, vec!["3".to_string()]);
}

/// Test that a failed simple-mode run leaves the cursor untouched
#[tokio::test]
async fn test_simple_mode_failure_commits_nothing() {
    let (store, cursor) = store_and_cursor().await;
    let config = fast_config().with_mode(DispatchMode::Simple);
    let adapter = Arc::new(ScriptedAdapter::default().fail("2"));

    let result = DownloadCoordinator::new(config, pool_of(1))
        .run(items(&["1", "2", "3"]), adapter.clone(), cursor)
        .await;

    assert!(result.is_err());
    assert_eq!(store.get_cursor("feed").await.unwrap(), "");
    // nothing dispatched after the failure
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
}

/// Test empty queue handling
#[tokio::test]
async fn test_empty_queue_is_a_noop() {
    let (_store, cursor) = store_and_cursor().await;
    let summary = DownloadCoordinator::new(fast_config(), pool_of(0))
        .run(Vec::new(), Arc::new(ScriptedAdapter::default()), cursor)
        .await
        .unwrap();
    assert_eq!(summary.total, 0);
    assert!(summary.all_completed());
}

#[tokio::test]
async fn test_empty_pool_rejected() {
    let (_store, cursor) = store_and_cursor().await;
    let result = DownloadCoordinator::new(fast_config(), pool_of(0))
        .run(items(&["1"]), Arc::new(ScriptedAdapter::default()), cursor)
        .await;
    assert!(matches!(result, Err(CoordinatorError::EmptyPool)));
}

/// Test cancellation mid-queue
///
/// Verifies dispatch stops, in-flight items finish, and the result
/// names how far dispatch got.
#[tokio::test]
async fn test_cancellation_stops_dispatch_and_drains() {
    let (store, cursor) = store_and_cursor().await;
    let cancel = CancellationToken::new();
    let adapter = Arc::new(
        ScriptedAdapter::default()
            .delay("1", 50)
            .delay("2", 50),
    );

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let result = DownloadCoordinator::new(fast_config(), pool_of(1))
        .with_cancellation(cancel)
        .run(items(&["1", "2", "3"]), adapter, cursor)
        .await;

    assert!(matches!(
        result,
        Err(CoordinatorError::Cancelled {
            dispatched: 1,
            total: 3
        })
    ));
    // the in-flight item still finished and committed
    assert_eq!(store.get_cursor("feed").await.unwrap(), "1");
}

/// Test the event sequence for a single item
#[tokio::test]
async fn test_events_follow_item_lifecycle() {
    let (_store, cursor) = store_and_cursor().await;
    let (tx, mut rx) = mpsc::channel(64);

    DownloadCoordinator::new(fast_config(), pool_of(1))
        .with_events(tx)
        .run(items(&["x"]), Arc::new(ScriptedAdapter::default()), cursor)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.first(), Some(&ItemEvent::Queued { total: 1 }));
    assert!(events
        .iter()
        .any(|e| matches!(e, ItemEvent::Started { item_id, .. } if item_id == "x")));
    assert!(events
        .iter()
        .any(|e| matches!(e, ItemEvent::Committed { item_id } if item_id == "x")));
    assert!(matches!(events.last(), Some(ItemEvent::Finished { .. })));
}
