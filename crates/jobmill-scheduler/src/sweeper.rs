//! Expiry sweeper.
//!
//! Periodically purges expired records from the shared store in bounded
//! batches, one category at a time, under a cluster-wide lock so at most
//! one process sweeps at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time;

use jobmill_core::config::sweeper::SweeperConfig;
use jobmill_core::error::ErrorKind;
use jobmill_core::result::AppResult;
use jobmill_core::traits::{ExpiryCategory, ExpiryStore};

/// Cluster-wide lock resource guarding expiry sweeps.
const EXPIRY_LOCK: &str = "jobmill:expiry";

/// Sweeps expired records out of the store in bounded batches.
///
/// Each pass walks the categories in a fixed order, acquiring the expiry
/// lock per category so long sweeps do not starve other maintenance. A
/// contended lock skips the category for this pass; another node is
/// already sweeping it.
#[derive(Debug)]
pub struct ExpirySweeper {
    store: Arc<dyn ExpiryStore>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn ExpiryStore>, config: SweeperConfig) -> Self {
        Self { store, config }
    }

    /// Run sweep passes until `cancel` flips or the channel closes.
    ///
    /// Between passes the sweeper sleeps for the configured interval,
    /// waking early on cancellation.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> AppResult<()> {
        let interval = Duration::from_secs(self.config.interval_seconds);
        tracing::info!(
            interval_seconds = self.config.interval_seconds,
            batch_size = self.config.effective_batch_size(),
            "expiry sweeper started"
        );

        loop {
            if *cancel.borrow() {
                tracing::info!("expiry sweeper stopping");
                return Ok(());
            }

            self.sweep_pass(&mut cancel).await?;

            tokio::select! {
                _ = cancelled(&mut cancel) => {
                    tracing::info!("expiry sweeper stopping");
                    return Ok(());
                }
                _ = time::sleep(interval) => {}
            }
        }
    }

    /// One full sweep over every category plus superseded state history.
    async fn sweep_pass(&self, cancel: &mut watch::Receiver<bool>) -> AppResult<()> {
        for category in ExpiryCategory::ALL {
            self.sweep_category(category, cancel).await?;
        }
        if self.config.state_retention_seconds > 0 {
            self.sweep_state_history(cancel).await?;
        }
        Ok(())
    }

    async fn sweep_category(
        &self,
        category: ExpiryCategory,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<()> {
        let timeout = Duration::from_secs(self.config.lock_timeout_seconds);
        match self.store.acquire_lock(EXPIRY_LOCK, timeout).await {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::LockTimeout => {
                tracing::debug!(%category, "expiry lock contended, skipping category");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        // The lock is released whether or not the deletes succeeded.
        let swept = self.delete_in_batches(category, cancel).await;
        let released = self.store.release_lock(EXPIRY_LOCK).await;
        let removed = swept?;
        released?;

        if removed > 0 {
            tracing::info!(%category, removed, "swept expired records");
        }
        Ok(())
    }

    /// Delete expired rows of one category until a batch comes back short.
    ///
    /// Cancellation and transient store errors (lock timeouts, cancelled
    /// statements) end the loop early without failing the pass; the next
    /// pass picks up where this one left off.
    async fn delete_in_batches(
        &self,
        category: ExpiryCategory,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<u64> {
        let batch_size = self.config.effective_batch_size();
        let mut total = 0u64;

        loop {
            let affected = tokio::select! {
                _ = cancelled(cancel) => {
                    tracing::debug!(%category, "sweep interrupted by shutdown");
                    0
                }
                result = self.store.delete_expired(category, Utc::now(), batch_size) => {
                    match result {
                        Ok(affected) => affected,
                        Err(e) if e.is_transient() => {
                            tracing::debug!(%category, error = %e, "transient error during sweep");
                            0
                        }
                        Err(e) => return Err(e),
                    }
                }
            };

            total += affected;
            tracing::trace!(%category, affected, total, "expiry batch deleted");
            if affected < u64::from(batch_size) {
                break;
            }
        }

        Ok(total)
    }

    /// Purge superseded state-history rows older than the retention window.
    async fn sweep_state_history(&self, cancel: &mut watch::Receiver<bool>) -> AppResult<()> {
        let timeout = Duration::from_secs(self.config.lock_timeout_seconds);
        match self.store.acquire_lock(EXPIRY_LOCK, timeout).await {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::LockTimeout => {
                tracing::debug!("expiry lock contended, skipping state history");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.state_retention_seconds as i64);

        let swept = self.purge_state_history(cutoff, cancel).await;
        let released = self.store.release_lock(EXPIRY_LOCK).await;
        let removed = swept?;
        released?;

        if removed > 0 {
            tracing::info!(removed, "purged superseded state history");
        }
        Ok(())
    }

    /// Batch loop over superseded state-history rows, same cancellation
    /// contract as the category loop: a shutdown request aborts the
    /// in-flight delete instead of waiting it out.
    async fn purge_state_history(
        &self,
        cutoff: chrono::DateTime<Utc>,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<u64> {
        let batch_size = self.config.effective_batch_size();
        let mut total = 0u64;

        loop {
            let affected = tokio::select! {
                _ = cancelled(cancel) => {
                    tracing::debug!("state history sweep interrupted by shutdown");
                    0
                }
                result = self.store.delete_superseded_states(cutoff, batch_size) => {
                    match result {
                        Ok(affected) => affected,
                        Err(e) if e.is_transient() => {
                            tracing::debug!(error = %e, "transient error during state history sweep");
                            0
                        }
                        Err(e) => return Err(e),
                    }
                }
            };

            total += affected;
            if affected < u64::from(batch_size) {
                break;
            }
        }

        Ok(total)
    }
}

/// Resolves when the cancel flag flips to true or the sender drops.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use jobmill_core::error::AppError;

    #[derive(Debug, Default)]
    struct MockStore {
        remaining: Mutex<HashMap<ExpiryCategory, u64>>,
        state_rows: Mutex<u64>,
        batches: Mutex<Vec<(ExpiryCategory, u64)>>,
        acquires: AtomicUsize,
        releases: AtomicUsize,
        lock_times_out: bool,
        fail_deletes: bool,
        state_delete_hangs: bool,
    }

    impl MockStore {
        fn with_rows(rows: &[(ExpiryCategory, u64)]) -> Self {
            Self {
                remaining: Mutex::new(rows.iter().copied().collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ExpiryStore for MockStore {
        async fn acquire_lock(&self, resource: &str, _timeout: Duration) -> AppResult<()> {
            if self.lock_times_out {
                return Err(AppError::lock_timeout(resource));
            }
            self.acquires.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn release_lock(&self, _resource: &str) -> AppResult<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete_expired(
            &self,
            category: ExpiryCategory,
            _now: DateTime<Utc>,
            limit: u32,
        ) -> AppResult<u64> {
            if self.fail_deletes {
                return Err(AppError::database("connection reset"));
            }
            let mut remaining = self.remaining.lock().unwrap();
            let rows = remaining.entry(category).or_insert(0);
            let affected = (*rows).min(u64::from(limit));
            *rows -= affected;
            self.batches.lock().unwrap().push((category, affected));
            Ok(affected)
        }

        async fn delete_superseded_states(
            &self,
            _cutoff: DateTime<Utc>,
            limit: u32,
        ) -> AppResult<u64> {
            if self.state_delete_hangs {
                std::future::pending::<()>().await;
            }
            let mut rows = self.state_rows.lock().unwrap();
            let affected = (*rows).min(u64::from(limit));
            *rows -= affected;
            Ok(affected)
        }
    }

    fn config(batch_size: u32) -> SweeperConfig {
        SweeperConfig {
            enabled: true,
            batch_size,
            state_retention_seconds: 0,
            interval_seconds: 0,
            lock_timeout_seconds: 1,
        }
    }

    fn sweeper(store: Arc<MockStore>, config: SweeperConfig) -> ExpirySweeper {
        ExpirySweeper::new(store, config)
    }

    #[tokio::test]
    async fn test_deletes_in_bounded_batches_until_short() {
        let store = Arc::new(MockStore::with_rows(&[(ExpiryCategory::Counters, 2500)]));
        let sweeper = sweeper(store.clone(), config(1000));
        let (_tx, mut cancel) = watch::channel(false);

        sweeper.sweep_pass(&mut cancel).await.unwrap();

        let batches = store.batches.lock().unwrap();
        let counter_batches: Vec<u64> = batches
            .iter()
            .filter(|(c, _)| *c == ExpiryCategory::Counters)
            .map(|(_, n)| *n)
            .collect();
        assert_eq!(counter_batches, vec![1000, 1000, 500]);
        // The four empty categories each see one short (empty) batch.
        assert_eq!(batches.len(), 7);
        assert_eq!(store.acquires.load(Ordering::SeqCst), 5);
        assert_eq!(store.releases.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_contended_lock_skips_the_pass_quietly() {
        let store = Arc::new(MockStore {
            lock_times_out: true,
            ..MockStore::with_rows(&[(ExpiryCategory::Jobs, 100)])
        });
        let sweeper = sweeper(store.clone(), config(1000));
        let (_tx, mut cancel) = watch::channel(false);

        sweeper.sweep_pass(&mut cancel).await.unwrap();

        assert!(store.batches.lock().unwrap().is_empty());
        assert_eq!(store.releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lock_released_when_deletes_fail() {
        let store = Arc::new(MockStore {
            fail_deletes: true,
            ..MockStore::default()
        });
        let sweeper = sweeper(store.clone(), config(1000));
        let (_tx, mut cancel) = watch::channel(false);

        let err = sweeper.sweep_pass(&mut cancel).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Database);
        assert_eq!(store.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(store.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_history_swept_when_retention_configured() {
        let store = Arc::new(MockStore::with_rows(&[]));
        *store.state_rows.lock().unwrap() = 1500;
        let mut cfg = config(1000);
        cfg.state_retention_seconds = 3600;
        let sweeper = sweeper(store.clone(), cfg);
        let (_tx, mut cancel) = watch::channel(false);

        sweeper.sweep_pass(&mut cancel).await.unwrap();

        assert_eq!(*store.state_rows.lock().unwrap(), 0);
        // Five category locks plus one for state history.
        assert_eq!(store.acquires.load(Ordering::SeqCst), 6);
        assert_eq!(store.releases.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_state_history_sweep_aborts_inflight_delete_on_cancel() {
        let store = Arc::new(MockStore {
            state_delete_hangs: true,
            ..MockStore::default()
        });
        let mut cfg = config(1000);
        cfg.state_retention_seconds = 3600;
        let sweeper = sweeper(store.clone(), cfg);
        let (tx, mut cancel) = watch::channel(false);

        let handle = tokio::spawn(async move { sweeper.sweep_pass(&mut cancel).await });
        // Let the pass block on the in-flight state delete, then cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("sweep pass must abort the in-flight delete on cancel");
        result.unwrap().unwrap();
        // The state-history lock is still released on the cancel path.
        assert_eq!(
            store.acquires.load(Ordering::SeqCst),
            store.releases.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_run_exits_promptly_when_already_cancelled() {
        let store = Arc::new(MockStore::default());
        let sweeper = sweeper(store.clone(), config(1000));
        let (tx, cancel) = watch::channel(false);
        tx.send(true).unwrap();

        sweeper.run(cancel).await.unwrap();
        assert_eq!(store.acquires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_sweeps_then_stops_on_cancel() {
        let store = Arc::new(MockStore::with_rows(&[(ExpiryCategory::Sets, 10)]));
        let mut cfg = config(1000);
        cfg.interval_seconds = 3600;
        let sweeper = sweeper(store.clone(), cfg);
        let (tx, cancel) = watch::channel(false);

        let handle = tokio::spawn(async move { sweeper.run(cancel).await });
        // Let the first pass complete, then request shutdown.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        handle.await.unwrap().unwrap();
        assert!(store
            .batches
            .lock()
            .unwrap()
            .iter()
            .any(|(c, n)| *c == ExpiryCategory::Sets && *n == 10));
    }
}
