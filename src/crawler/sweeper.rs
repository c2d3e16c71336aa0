//! Periodic lease-expiry sweep
//!
//! Runs on its own store connection alongside the workers and hands claims
//! abandoned by crashed or stuck workers back to the queue.

use crate::storage::{FrontierStore, StorageResult};
use std::time::Duration;
use tokio::sync::watch;

/// Floor on the sweep period so tiny leases don't spin
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

pub struct LeaseSweeper<S: FrontierStore> {
    store: S,
    lease: Duration,
    interval: Duration,
}

impl<S: FrontierStore> LeaseSweeper<S> {
    /// Sweeps every half lease period
    pub fn new(store: S, lease: Duration) -> Self {
        Self {
            store,
            lease,
            interval: (lease / 2).max(MIN_SWEEP_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reclaims every claim older than the lease, once
    pub fn sweep(&mut self) -> StorageResult<Vec<i64>> {
        let reclaimed = self.store.reclaim_stale(self.lease)?;
        if !reclaimed.is_empty() {
            tracing::info!("Lease sweep reclaimed {} items", reclaimed.len());
        }
        Ok(reclaimed)
    }

    /// Sweeps on a fixed period until `shutdown` flips to true
    ///
    /// A failing sweep is logged and retried on the next tick.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep() {
                        tracing::warn!("Lease sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Lease sweeper stopped");
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontier::DiscoveredLink;
    use crate::state::ItemStatus;
    use crate::storage::{QueuePolicy, SqliteStore};

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(QueuePolicy::default()).unwrap()
    }

    #[test]
    fn test_interval_is_half_the_lease() {
        let sweeper = LeaseSweeper::new(store(), Duration::from_secs(600));
        assert_eq!(sweeper.interval(), Duration::from_secs(300));

        let tiny = LeaseSweeper::new(store(), Duration::from_millis(2));
        assert_eq!(tiny.interval(), MIN_SWEEP_INTERVAL);
    }

    #[test]
    fn test_sweep_reclaims_expired_claims() {
        let mut store = store();
        let id = store
            .merge(&DiscoveredLink::seed("https://example.com/", 0))
            .unwrap()
            .item_id();
        store.claim("crashed", 1).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let mut sweeper = LeaseSweeper::new(store, Duration::from_millis(5));
        assert_eq!(sweeper.sweep().unwrap(), vec![id]);
        assert!(sweeper.sweep().unwrap().is_empty());

        let store = sweeper.into_store();
        assert_eq!(store.get_item(id).unwrap().status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut sweeper = LeaseSweeper::new(store(), Duration::from_millis(20));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            sweeper.run(rx).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        assert!(tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_ok());
    }
}
