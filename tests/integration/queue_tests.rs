//! Multi-connection tests for the SQLite frontier queue
//!
//! Every thread opens its own connection to a shared database file, the way
//! separate worker processes would.

use stashy::storage::QueuePolicy;
use stashy::{DiscoveredLink, FrontierStore, ItemSource, ItemStatus, SqliteStore};
use std::collections::HashSet;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn open(path: &Path, policy: QueuePolicy) -> SqliteStore {
    SqliteStore::new(path, policy).expect("Failed to open store")
}

fn seed_items(store: &mut SqliteStore, count: usize) -> Vec<i64> {
    (0..count)
        .map(|i| {
            store
                .merge(&DiscoveredLink::seed(
                    format!("https://example.com/page/{}", i),
                    (i % 7) as i64,
                ))
                .expect("Failed to seed")
                .item_id()
        })
        .collect()
}

#[test]
fn test_concurrent_claims_are_disjoint_and_complete() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");

    let mut seeder = open(&db_path, QueuePolicy::default());
    let seeded: HashSet<i64> = seed_items(&mut seeder, 120).into_iter().collect();

    // Open every connection up front so schema setup never races
    let stores: Vec<SqliteStore> = (0..4)
        .map(|_| open(&db_path, QueuePolicy::default()))
        .collect();

    let handles: Vec<_> = stores
        .into_iter()
        .enumerate()
        .map(|(i, mut store)| {
            thread::spawn(move || {
                let worker_id = format!("worker-{}", i);
                let mut claimed = Vec::new();
                loop {
                    let batch = store.claim(&worker_id, 7).expect("Claim failed");
                    if batch.is_empty() {
                        break;
                    }
                    for item in batch {
                        assert_eq!(item.claim_owner.as_deref(), Some(worker_id.as_str()));
                        claimed.push(item.id);
                    }
                }
                (worker_id, claimed)
            })
        })
        .collect();

    let mut all_claimed = HashSet::new();
    for handle in handles {
        let (worker_id, claimed) = handle.join().expect("Claiming thread panicked");
        for id in claimed {
            assert!(all_claimed.insert(id), "item {} claimed twice", id);
            let item = seeder.get_item(id).unwrap();
            assert_eq!(item.status, ItemStatus::InProgress);
            assert_eq!(item.claim_owner.as_deref(), Some(worker_id.as_str()));
        }
    }

    assert_eq!(all_claimed, seeded);
    assert_eq!(seeder.count_by_status(ItemStatus::Pending).unwrap(), 0);
    assert_eq!(seeder.queue_depth().unwrap(), 0);
}

#[test]
fn test_concurrent_merges_of_one_url_converge() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");

    let mut reader = open(&db_path, QueuePolicy::default());
    let stores: Vec<SqliteStore> = (0..4)
        .map(|_| open(&db_path, QueuePolicy::default()))
        .collect();

    let handles: Vec<_> = stores
        .into_iter()
        .enumerate()
        .map(|(i, mut store)| {
            thread::spawn(move || {
                for round in 0..10i64 {
                    let link = DiscoveredLink::discovered(
                        1,
                        "https://Example.com/shared#frag",
                        i as i64 * 10 + round,
                        0.05 * i as f64,
                        5 - i as i64,
                    );
                    store.merge(&link).expect("Merge failed");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Merging thread panicked");
    }

    assert_eq!(reader.count_total().unwrap(), 1);
    let item = reader
        .get_item_by_url("https://example.com/shared")
        .unwrap()
        .expect("Merged item missing");
    assert_eq!(item.priority, 39);
    assert!((item.relevance_score - 0.15).abs() < 1e-9);
    assert_eq!(item.depth, 2);
    assert_eq!(item.source, ItemSource::Frontier);
    assert_eq!(item.status, ItemStatus::Pending);

    // A seed merge afterwards still reaches the same row
    let outcome = reader
        .merge(&DiscoveredLink::seed("https://example.com/shared", 0))
        .unwrap();
    assert!(!outcome.inserted());
    assert_eq!(outcome.item_id(), item.id);
}

#[test]
fn test_abandoned_claim_is_recovered_by_another_connection() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");

    let mut crashed = open(&db_path, QueuePolicy::default());
    let id = crashed
        .merge(&DiscoveredLink::seed("https://example.com/", 0))
        .unwrap()
        .item_id();
    assert_eq!(crashed.claim("crashed-worker", 1).unwrap().len(), 1);
    drop(crashed);

    let mut sweeper = open(&db_path, QueuePolicy::default());
    assert!(sweeper
        .reclaim_stale(Duration::from_secs(600))
        .unwrap()
        .is_empty());

    thread::sleep(Duration::from_millis(20));
    assert_eq!(
        sweeper.reclaim_stale(Duration::from_millis(5)).unwrap(),
        vec![id]
    );

    let mut healthy = open(&db_path, QueuePolicy::default());
    let batch = healthy.claim("healthy-worker", 5).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, id);
    assert_eq!(batch[0].retry_count, 1);
    let last_error = batch[0].last_error.as_deref().unwrap_or_default();
    assert!(last_error.contains("lease expired"));
    assert!(last_error.contains("crashed-worker"));

    assert!(healthy.mark_done(id, "healthy-worker").unwrap());
    let item = sweeper.get_item(id).unwrap();
    assert_eq!(item.status, ItemStatus::Done);
    assert!(item.claim_owner.is_none());
    assert!(item.processed_at.is_some());
}

#[test]
fn test_slow_worker_cannot_touch_a_reassigned_claim() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");

    let mut slow = open(&db_path, QueuePolicy::default());
    let mut live = open(&db_path, QueuePolicy::default());
    let mut sweeper = open(&db_path, QueuePolicy::default());
    let mut bystander = open(&db_path, QueuePolicy::default());

    let id = slow
        .merge(&DiscoveredLink::seed("https://example.com/slow", 0))
        .unwrap()
        .item_id();
    assert_eq!(slow.claim("slow-worker", 1).unwrap().len(), 1);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(
        sweeper.reclaim_stale(Duration::from_millis(5)).unwrap(),
        vec![id]
    );
    let held = live.claim("live-worker", 1).unwrap().remove(0);
    assert_eq!(held.retry_count, 1);

    // The original owner finally reports; the live claim must survive
    assert_eq!(
        slow.mark_failed(id, "slow-worker", "timed out").unwrap(),
        None
    );
    assert!(!slow.mark_done(id, "slow-worker").unwrap());

    let item = sweeper.get_item(id).unwrap();
    assert_eq!(item.status, ItemStatus::InProgress);
    assert_eq!(item.claim_owner.as_deref(), Some("live-worker"));
    assert_eq!(item.claim_time, held.claim_time);
    assert_eq!(item.retry_count, 1);
    assert!(bystander.claim("bystander", 5).unwrap().is_empty());

    assert!(live.mark_done(id, "live-worker").unwrap());
    let item = sweeper.get_item(id).unwrap();
    assert_eq!(item.status, ItemStatus::Done);
    assert_eq!(item.retry_count, 1);
}

#[test]
fn test_retry_exhaustion_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");
    let policy = QueuePolicy {
        max_retries: 2,
        ..QueuePolicy::default()
    };

    let id = {
        let mut store = open(&db_path, policy.clone());
        let id = store
            .merge(&DiscoveredLink::seed("https://example.com/flaky", 0))
            .unwrap()
            .item_id();

        store.claim("w1", 1).unwrap();
        assert_eq!(
            store.mark_failed(id, "w1", "HTTP 503").unwrap(),
            Some(ItemStatus::Pending)
        );
        id
    };

    let mut store = open(&db_path, policy.clone());
    assert_eq!(store.claim("w2", 1).unwrap()[0].id, id);
    assert_eq!(
        store.mark_failed(id, "w2", "HTTP 503 again").unwrap(),
        Some(ItemStatus::Failed)
    );
    drop(store);

    let mut reopened = open(&db_path, policy);
    let item = reopened.get_item(id).unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.retry_count, 2);
    assert_eq!(item.last_error.as_deref(), Some("HTTP 503 again"));
    assert!(reopened.claim("w3", 10).unwrap().is_empty());
    assert_eq!(reopened.terminal_failures(10).unwrap().len(), 1);
}

#[test]
fn test_observations_from_many_workers_share_one_log() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");

    let stores: Vec<SqliteStore> = (0..3)
        .map(|_| open(&db_path, QueuePolicy::default()))
        .collect();

    let handles: Vec<_> = stores
        .into_iter()
        .enumerate()
        .map(|(i, mut store)| {
            thread::spawn(move || {
                let mut stamps = Vec::new();
                for processed in 1..=5 {
                    stamps.push(
                        store
                            .record(&stashy::storage::WorkerObservation {
                                worker_id: format!("worker-{}", i),
                                processed_count: processed,
                                ..Default::default()
                            })
                            .expect("Record failed"),
                    );
                }
                stamps
            })
        })
        .collect();

    for handle in handles {
        let stamps = handle.join().expect("Recording thread panicked");
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    let reader = open(&db_path, QueuePolicy::default());
    assert_eq!(reader.observations(None).unwrap().len(), 15);

    let mine = reader.observations(Some("worker-1")).unwrap();
    let counts: Vec<u64> = mine
        .iter()
        .map(|record| record.observation.processed_count)
        .collect();
    assert_eq!(counts, vec![1, 2, 3, 4, 5]);
}
