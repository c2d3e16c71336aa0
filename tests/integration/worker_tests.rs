//! End-to-end worker tests
//!
//! These tests use wiremock to serve a small site and run real workers with
//! the HTTP fetcher against a SQLite queue on disk.

use async_trait::async_trait;
use stashy::config::{FrontierConfig, UserAgentConfig};
use stashy::crawler::{
    FetchError, FetchedPage, HttpFetcher, ItemOutcome, KeywordScorer, PageFetcher,
    RelevanceScorer, Worker, WorkerSettings,
};
use stashy::storage::QueuePolicy;
use stashy::{DiscoveredLink, FrontierStore, ItemSource, ItemStatus, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

fn create_settings(worker_id: &str) -> WorkerSettings {
    WorkerSettings {
        worker_id: worker_id.to_string(),
        batch_size: 3,
        poll_interval: Duration::from_millis(20),
        metrics_flush_every: 100,
        frontier: FrontierConfig {
            max_depth: 2,
            max_links: 16,
            relevance_threshold: 0.0,
        },
    }
}

fn create_worker(db_path: &Path, worker_id: &str) -> Worker<SqliteStore> {
    let fetcher: Arc<dyn PageFetcher> = Arc::new(
        HttpFetcher::new(&create_user_agent(), Duration::from_secs(5))
            .expect("Failed to build fetcher"),
    );
    let scorer: Arc<dyn RelevanceScorer> = Arc::new(KeywordScorer::default());
    Worker::new(open(db_path), fetcher, scorer, create_settings(worker_id))
}

fn open(db_path: &Path) -> SqliteStore {
    SqliteStore::new(
        db_path,
        QueuePolicy {
            max_retries: 2,
            ..QueuePolicy::default()
        },
    )
    .expect("Failed to open store")
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html")
}

/// Serves an acyclic site:
///
/// `/` links to `/guide`, `/about`, `/missing` (404) and `/feed` (not HTML);
/// `/guide` links to `/deep`.
async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><title>Home</title></head><body>
            <p>Welcome to the test site.</p>
            <a href="/guide">Guide</a>
            <a href="/about">About</a>
            <a href="/missing">Missing</a>
            <a href="/feed">Feed</a>
            </body></html>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/guide"))
        .respond_with(html(
            r#"<html><head><title>Guide</title></head><body>
            <p>A longer guide page.</p>
            <a href="/deep">Deeper</a>
            </body></html>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html(
            "<html><head><title>About</title></head><body><p>About us.</p></body></html>",
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/deep"))
        .respond_with(html(
            r#"<html><head><title>Deep</title></head><body>
            <p>Deepest page.</p>
            <a href="/deeper-still">Too deep</a>
            </body></html>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"{\"items\":[]}".to_vec(), "application/json"),
        )
        .mount(server)
        .await;
}

fn seed(db_path: &Path, base_url: &str) -> i64 {
    let mut store = open(db_path);
    store
        .merge(&DiscoveredLink::seed(format!("{}/", base_url), 10))
        .expect("Failed to seed")
        .item_id()
}

#[tokio::test]
async fn test_worker_drains_site() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;
    let base_url = mock_server.uri();

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");
    let seed_id = seed(&db_path, &base_url);

    let mut worker = create_worker(&db_path, "it-worker");
    let summary = worker.run_until_idle().await.unwrap();

    // Two failing URLs, each tried twice before becoming terminal
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.failed, 4);
    assert_eq!(summary.enqueued, 5);

    let store = worker.into_store();
    assert_eq!(store.count_total().unwrap(), 6);
    assert_eq!(store.count_by_status(ItemStatus::Done).unwrap(), 4);
    assert_eq!(store.count_by_status(ItemStatus::Failed).unwrap(), 2);
    assert_eq!(store.count_by_status(ItemStatus::InProgress).unwrap(), 0);
    assert_eq!(store.queue_depth().unwrap(), 0);

    let guide = store
        .get_item_by_url(&format!("{}/guide", base_url))
        .unwrap()
        .expect("Guide was not discovered");
    assert_eq!(guide.status, ItemStatus::Done);
    assert_eq!(guide.parent_id, Some(seed_id));
    assert_eq!(guide.depth, 1);
    assert_eq!(guide.source, ItemSource::Frontier);

    let deep = store
        .get_item_by_url(&format!("{}/deep", base_url))
        .unwrap()
        .expect("Deep page was not discovered");
    assert_eq!(deep.parent_id, Some(guide.id));
    assert_eq!(deep.depth, 2);

    // Pages at the depth limit contribute no links
    assert!(store
        .get_item_by_url(&format!("{}/deeper-still", base_url))
        .unwrap()
        .is_none());

    let missing = store
        .get_item_by_url(&format!("{}/missing", base_url))
        .unwrap()
        .expect("Missing page was not discovered");
    assert_eq!(missing.status, ItemStatus::Failed);
    assert_eq!(missing.retry_count, 2);
    assert!(missing.last_error.unwrap_or_default().contains("404"));

    let feed = store
        .get_item_by_url(&format!("{}/feed", base_url))
        .unwrap()
        .expect("Feed was not discovered");
    assert_eq!(feed.status, ItemStatus::Failed);
    assert!(feed
        .last_error
        .unwrap_or_default()
        .contains("application/json"));

    let observations = store.observations(Some("it-worker")).unwrap();
    let last = observations.last().expect("No observation recorded");
    assert_eq!(last.observation.processed_count, 4);
    assert_eq!(last.observation.failed_count, 4);
    assert_eq!(last.observation.frontier_enqueued, 5);
    assert_eq!(last.observation.queue_depth, 0);
    assert!(last.observation.p95_latency_ms >= 0.0);
}

#[tokio::test]
async fn test_rediscovery_requeues_finished_item() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;
    let base_url = mock_server.uri();

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");
    seed(&db_path, &base_url);

    let mut worker = create_worker(&db_path, "it-worker");
    worker.run_until_idle().await.unwrap();

    let mut store = open(&db_path);
    let about_url = format!("{}/about", base_url);
    let outcome = store
        .merge(&DiscoveredLink::seed(about_url.as_str(), 0))
        .unwrap();
    assert!(outcome.resurrected());

    let about = store.get_item_by_url(&about_url).unwrap().unwrap();
    assert_eq!(about.status, ItemStatus::Pending);
    assert_eq!(about.retry_count, 0);

    let summary = worker.run_until_idle().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(
        store.get_item(about.id).unwrap().status,
        ItemStatus::Done
    );
}

#[tokio::test]
async fn test_two_workers_share_one_queue() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;
    let base_url = mock_server.uri();

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");
    seed(&db_path, &base_url);

    let mut first = create_worker(&db_path, "worker-a");
    let mut second = create_worker(&db_path, "worker-b");

    // Run the first pass alone so both workers have frontier to share
    first.run_once().await.unwrap();
    let (a, b) = tokio::join!(first.run_until_idle(), second.run_until_idle());
    let (a, b) = (a.unwrap(), b.unwrap());

    // The seed was handled by the first pass outside either summary
    assert_eq!(a.processed + b.processed, 3);
    assert_eq!(a.failed + b.failed, 4);

    let store = open(&db_path);
    assert_eq!(store.count_by_status(ItemStatus::Done).unwrap(), 4);
    assert_eq!(store.count_by_status(ItemStatus::Failed).unwrap(), 2);
    assert_eq!(store.count_by_status(ItemStatus::Pending).unwrap(), 0);
}

#[tokio::test]
async fn test_worker_run_stops_on_shutdown() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;
    let base_url = mock_server.uri();

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");
    seed(&db_path, &base_url);

    let mut worker = create_worker(&db_path, "polling-worker");
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(rx).await });

    let store = open(&db_path);
    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let done = store.count_by_status(ItemStatus::Done).unwrap();
            let failed = store.count_by_status(ItemStatus::Failed).unwrap();
            if done == 4 && failed == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "worker did not drain the queue");

    tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .expect("worker task panicked");
    assert!(result.is_ok());

    // Shutdown flushes a final observation
    let observations = store.observations(Some("polling-worker")).unwrap();
    assert_eq!(
        observations.last().map(|r| r.observation.processed_count),
        Some(4)
    );
}

/// Lets the lease lapse while "fetching" and hands the item to another
/// worker before returning the page
struct LeaseLosingFetcher {
    db_path: PathBuf,
}

#[async_trait]
impl PageFetcher for LeaseLosingFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut other = open(&self.db_path);
        std::thread::sleep(Duration::from_millis(10));
        let reclaimed = other
            .reclaim_stale(Duration::from_millis(1))
            .map_err(|e| FetchError::Request(e.to_string()))?;
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(other.claim("replacement", 1).unwrap().len(), 1);

        Ok(FetchedPage {
            final_url: url.to_string(),
            status_code: 200,
            content_type: "text/html".to_string(),
            body: "<html><body><p>late page</p></body></html>".to_string(),
        })
    }
}

#[tokio::test]
async fn test_worker_reports_lost_claim() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");
    let id = seed(&db_path, "https://example.com");

    let fetcher: Arc<dyn PageFetcher> = Arc::new(LeaseLosingFetcher {
        db_path: db_path.clone(),
    });
    let mut worker = Worker::new(
        open(&db_path),
        fetcher,
        Arc::new(KeywordScorer::default()),
        create_settings("stalled-worker"),
    );

    let outcomes = worker.run_once().await.unwrap();
    assert_eq!(outcomes, vec![(id, ItemOutcome::ClaimLost)]);
    assert_eq!(worker.metrics().processed(), 0);

    let item = open(&db_path).get_item(id).unwrap();
    assert_eq!(item.status, ItemStatus::InProgress);
    assert_eq!(item.claim_owner.as_deref(), Some("replacement"));
    assert_eq!(item.retry_count, 1);
    assert!(item.processed_at.is_none());
}

#[tokio::test]
async fn test_http_fetcher_success() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;

    let fetcher = HttpFetcher::new(&create_user_agent(), Duration::from_secs(5)).unwrap();
    let page = fetcher
        .fetch(&format!("{}/about", mock_server.uri()))
        .await
        .unwrap();

    assert_eq!(page.status_code, 200);
    assert!(page.content_type.starts_with("text/html"));
    assert!(page.body.contains("About us."));
    assert!(page.final_url.ends_with("/about"));
}

#[tokio::test]
async fn test_http_fetcher_error_status() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;

    let fetcher = HttpFetcher::new(&create_user_agent(), Duration::from_secs(5)).unwrap();
    let result = fetcher
        .fetch(&format!("{}/missing", mock_server.uri()))
        .await;

    assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
}

#[tokio::test]
async fn test_http_fetcher_rejects_non_html() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;

    let fetcher = HttpFetcher::new(&create_user_agent(), Duration::from_secs(5)).unwrap();
    let result = fetcher.fetch(&format!("{}/feed", mock_server.uri())).await;

    match result {
        Err(FetchError::ContentMismatch { content_type }) => {
            assert!(content_type.starts_with("application/json"))
        }
        other => panic!("expected content mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_fetcher_sends_user_agent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ua"))
        .and(wiremock::matchers::header(
            "user-agent",
            create_user_agent().header_value().as_str(),
        ))
        .respond_with(html("<html><body><p>hello</p></body></html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new(&create_user_agent(), Duration::from_secs(5)).unwrap();
    assert!(fetcher
        .fetch(&format!("{}/ua", mock_server.uri()))
        .await
        .is_ok());
}
