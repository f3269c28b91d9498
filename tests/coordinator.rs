//! Integration tests for the coordinator and the source processor
//!
//! These tests drive real sessions against wiremock servers: cursor behaviour when
//! an item fails mid-queue, pool bookkeeping, rate-limit pacing, and resuming a
//! source from its persisted cursor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use source_archiver::app::modules::JsonFeedAdapter;
use source_archiver::app::{
    ClientConfig, ContentAdapter, CoordinatorConfig, DownloadCoordinator, EgressPool,
    EgressSession, JsonStore, ModuleRegistry, ProcessorSettings, ProgressCursor, QueueItem,
    RateLimitConfig, Session, SessionState, SourceProcessor, SourceStore, TrackedSource,
};
use source_archiver::app::MemoryStore;
use source_archiver::auth::Credentials;
use source_archiver::errors::{AppError, AuthError, CoordinatorError, DownloadResult};

/// Client configuration with millisecond back-off for fast tests
fn fast_client() -> ClientConfig {
    ClientConfig {
        request_timeout: Duration::from_secs(5),
        download_timeout: Duration::from_secs(5),
        retry_delay_unit: Duration::from_millis(5),
        throttle_cooldown: Duration::from_millis(20),
        ..Default::default()
    }
}

fn fast_coordinator() -> CoordinatorConfig {
    CoordinatorConfig::default().with_poll_interval(Duration::from_millis(5))
}

fn pool_of(n: usize, config: ClientConfig) -> Arc<EgressPool> {
    let sessions = (0..n).map(|_| Session::new(config.clone()).unwrap()).collect();
    Arc::new(EgressPool::from_sessions(sessions))
}

fn feed_source(server: &MockServer) -> TrackedSource {
    TrackedSource::new("feed", "json_feed", format!("{}/feed.json", server.uri()))
        .with_sub_folder("feed")
}

fn file_item(server: &MockServer, id: &str) -> QueueItem {
    QueueItem::new(
        id,
        format!("{}/files/{}.bin", server.uri(), id),
        format!("{}.bin", id),
    )
}

async fn mount_file(server: &MockServer, id: &str, delay_ms: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{}.bin", id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("content of {}", id))
                .set_delay(Duration::from_millis(delay_ms)),
        )
        .mount(server)
        .await;
}

async fn cursor_for(store: Arc<dyn SourceStore>, source: TrackedSource) -> ProgressCursor {
    let key = source.key.clone();
    store.upsert_source(source).await.unwrap();
    ProgressCursor::load(store, &key).await.unwrap()
}

#[tokio::test]
async fn test_failed_middle_item_keeps_cursor_at_first() {
    let server = MockServer::start().await;
    mount_file(&server, "A", 10).await;
    mount_file(&server, "C", 30).await;
    Mock::given(method("GET"))
        .and(path("/files/B.bin"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store: Arc<dyn SourceStore> = Arc::new(MemoryStore::new());
    let source = feed_source(&server);
    let cursor = cursor_for(Arc::clone(&store), source.clone()).await;
    let adapter = Arc::new(JsonFeedAdapter::new(source.clone(), dir.path()));

    let items = vec![
        file_item(&server, "A"),
        file_item(&server, "B"),
        file_item(&server, "C"),
    ];
    let err = DownloadCoordinator::new(fast_coordinator(), pool_of(2, fast_client()))
        .run(items, adapter, cursor)
        .await
        .unwrap_err();

    match err {
        CoordinatorError::ItemFailed { item_id, source, .. } => {
            assert_eq!(item_id, "B");
            assert_eq!(source.status(), Some(404));
        }
        other => panic!("Expected ItemFailed, got {:?}", other),
    }
    assert_eq!(store.get_cursor("feed").await.unwrap(), "A");

    let folder = dir.path().join("json_feed").join("feed");
    assert!(folder.join("A.bin").exists());
    assert!(folder.join("C.bin").exists());
    assert!(!folder.join("B.bin").exists());
}

#[tokio::test]
async fn test_pool_of_three_drains_ten_items() {
    let server = MockServer::start().await;
    let ids: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
    for (i, id) in ids.iter().enumerate() {
        mount_file(&server, id, 5 + (i as u64 * 13) % 40).await;
    }

    let dir = TempDir::new().unwrap();
    let store: Arc<dyn SourceStore> = Arc::new(MemoryStore::new());
    let source = feed_source(&server);
    let cursor = cursor_for(Arc::clone(&store), source.clone()).await;
    let adapter = Arc::new(JsonFeedAdapter::new(source, dir.path()));
    let pool = pool_of(3, fast_client());

    let items = ids.iter().map(|id| file_item(&server, id)).collect();
    let summary = DownloadCoordinator::new(fast_coordinator(), Arc::clone(&pool))
        .run(items, adapter, cursor)
        .await
        .unwrap();

    assert_eq!(summary.completed, 10);
    assert_eq!(summary.cursor, "10");
    assert_eq!(store.get_cursor("feed").await.unwrap(), "10");
    assert_eq!(pool.states().await, vec![SessionState::Free; 3]);
}

/// Adapter that only issues a GET per item
struct FetchOnly;

#[async_trait]
impl ContentAdapter for FetchOnly {
    async fn download(&self, session: &EgressSession, item: &QueueItem) -> DownloadResult<()> {
        session.session().get(&item.file_uri, &[]).await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_rate_limit_paces_single_session() {
    let server = MockServer::start().await;
    for id in ["1", "2", "3", "4", "5"] {
        mount_file(&server, id, 0).await;
    }

    let config = ClientConfig {
        rate_limit: Some(RateLimitConfig::per(Duration::from_millis(500))),
        ..fast_client()
    };
    let store: Arc<dyn SourceStore> = Arc::new(MemoryStore::new());
    let cursor = cursor_for(Arc::clone(&store), feed_source(&server)).await;
    let items = ["1", "2", "3", "4", "5"]
        .iter()
        .map(|id| file_item(&server, id))
        .collect();

    let started = Instant::now();
    let summary = DownloadCoordinator::new(fast_coordinator(), pool_of(1, config))
        .run(items, Arc::new(FetchOnly), cursor)
        .await
        .unwrap();

    assert_eq!(summary.cursor, "5");
    assert!(started.elapsed() >= Duration::from_millis(2000));
}

fn feed_body(server: &MockServer, ids: &[u32], complete: bool) -> serde_json::Value {
    let items: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "url": format!("{}/files/{}.bin", server.uri(), id),
            })
        })
        .collect();
    json!({ "items": items, "complete": complete })
}

fn processor_settings(dir: &TempDir) -> ProcessorSettings {
    ProcessorSettings {
        download_root: dir.path().join("archive"),
        client: fast_client(),
        coordinator: fast_coordinator(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_processor_resume_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body(&server, &[3, 2, 1], false)))
        .mount(&server)
        .await;
    for id in ["1", "2", "3"] {
        Mock::given(method("GET"))
            .and(path(format!("/files/{}.bin", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(id))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonStore::open(dir.path().join("state.json")).await.unwrap());
    store.upsert_source(feed_source(&server)).await.unwrap();

    let processor = SourceProcessor::new(
        store.clone(),
        Arc::new(ModuleRegistry::with_builtin()),
        processor_settings(&dir),
    );

    let first = processor.process("feed").await.unwrap();
    assert_eq!(first.discovered, 3);
    assert_eq!(first.summary.cursor, "3");

    let second = processor.process("feed").await.unwrap();
    assert_eq!(second.discovered, 0);
    assert_eq!(second.summary.completed, 0);

    // the cursor survived on disk
    let reopened = JsonStore::open(dir.path().join("state.json")).await.unwrap();
    let source = reopened.get_source("feed").await.unwrap();
    assert_eq!(source.current_item_cursor, "3");
    assert!(source.last_checked.is_some());
    assert!(!source.complete);

    let folder = dir.path().join("archive").join("json_feed").join("feed");
    assert_eq!(std::fs::read_to_string(folder.join("2.bin")).unwrap(), "2");
}

#[tokio::test]
async fn test_processor_restarts_after_link_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body(&server, &[3, 2, 1], true)))
        .mount(&server)
        .await;
    mount_file(&server, "1", 0).await;
    mount_file(&server, "3", 0).await;
    Mock::given(method("GET"))
        .and(path("/files/2.bin"))
        .respond_with(ResponseTemplate::new(403))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_file(&server, "2", 0).await;

    let dir = TempDir::new().unwrap();
    let store: Arc<dyn SourceStore> = Arc::new(MemoryStore::new());
    store.upsert_source(feed_source(&server)).await.unwrap();

    let outcome = SourceProcessor::new(
        Arc::clone(&store),
        Arc::new(ModuleRegistry::with_builtin()),
        processor_settings(&dir),
    )
    .process("feed")
    .await
    .unwrap();

    assert_eq!(outcome.restarts, 1);
    assert_eq!(outcome.summary.cursor, "3");
    // the restart only rediscovered what was left after the cursor
    assert_eq!(outcome.discovered, 2);
    assert!(outcome.exhausted);

    let source = store.get_source("feed").await.unwrap();
    assert!(source.complete);
}

#[tokio::test]
async fn test_processor_gives_up_after_restart_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body(&server, &[1], false)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/1.bin"))
        .respond_with(ResponseTemplate::new(403))
        // one initial run plus two restarts
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store: Arc<dyn SourceStore> = Arc::new(MemoryStore::new());
    store.upsert_source(feed_source(&server)).await.unwrap();

    let err = SourceProcessor::new(
        Arc::clone(&store),
        Arc::new(ModuleRegistry::with_builtin()),
        processor_settings(&dir),
    )
    .process("feed")
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        AppError::Coordinator(CoordinatorError::ItemFailed { .. })
    ));
    assert_eq!(store.get_cursor("feed").await.unwrap(), "");
}

#[tokio::test]
async fn test_deleted_item_is_skipped_and_committed_past() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body(&server, &[2, 1], false)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/1.bin"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&server)
        .await;
    mount_file(&server, "2", 0).await;

    let dir = TempDir::new().unwrap();
    let store: Arc<dyn SourceStore> = Arc::new(MemoryStore::new());
    store.upsert_source(feed_source(&server)).await.unwrap();

    let outcome = SourceProcessor::new(
        Arc::clone(&store),
        Arc::new(ModuleRegistry::with_builtin()),
        processor_settings(&dir),
    )
    .process("feed")
    .await
    .unwrap();

    assert_eq!(outcome.summary.cursor, "2");
    assert_eq!(outcome.summary.completed, 2);
    let folder = dir.path().join("archive").join("json_feed").join("feed");
    assert!(!folder.join("1.bin").exists());
    assert!(folder.join("2.bin").exists());
}

#[tokio::test]
async fn test_stored_account_logs_in_and_saves_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("username=alice"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "session=s3cret; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body(&server, &[], false)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store: Arc<dyn SourceStore> = Arc::new(MemoryStore::new());
    store.upsert_source(feed_source(&server)).await.unwrap();
    store
        .set_account("json_feed", Credentials::new("alice", "pw").unwrap())
        .await
        .unwrap();

    SourceProcessor::new(
        Arc::clone(&store),
        Arc::new(ModuleRegistry::with_builtin()),
        processor_settings(&dir),
    )
    .process("feed")
    .await
    .unwrap();

    let cookies = store.get_cookies("json_feed").await.unwrap();
    assert!(cookies.iter().any(|c| c.name == "session" && c.value == "s3cret"));
}

#[tokio::test]
async fn test_rejected_login_stops_before_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(feed_body(&server, &[1], false)))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store: Arc<dyn SourceStore> = Arc::new(MemoryStore::new());
    store.upsert_source(feed_source(&server)).await.unwrap();
    store
        .set_account("json_feed", Credentials::new("alice", "wrong").unwrap())
        .await
        .unwrap();

    let err = SourceProcessor::new(
        Arc::clone(&store),
        Arc::new(ModuleRegistry::with_builtin()),
        processor_settings(&dir),
    )
    .process("feed")
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Auth(AuthError::LoginFailed { .. })));
    assert_eq!(store.get_cursor("feed").await.unwrap(), "");
}
