//! Fire-and-forget cache write-back.
//!
//! The pipeline hands finished artifacts to [`PersistWorker::submit`] after the
//! response is built. A single background task performs the `put`s; failures
//! and panics are logged and counted, never propagated.

use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::error::AppError;

/// Called for every write-back that did not land
pub type FailureObserver = Arc<dyn Fn(&CacheKey, &AppError) + Send + Sync>;

/// One artifact waiting to be stored
#[derive(Debug, Clone)]
pub struct PersistJob {
    pub request_id: String,
    pub key: CacheKey,
    pub entry: CacheEntry,
}

enum PersistMessage {
    Write(PersistJob),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct PersistCounters {
    stored: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of worker activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistStats {
    pub stored: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Handle to the background write-back task
#[derive(Clone)]
pub struct PersistWorker {
    tx: mpsc::Sender<PersistMessage>,
    counters: Arc<PersistCounters>,
}

impl PersistWorker {
    pub fn spawn(store: Arc<dyn CacheStore>, queue_size: usize) -> Self {
        Self::spawn_with_observer(store, queue_size, None)
    }

    pub fn spawn_with_observer(
        store: Arc<dyn CacheStore>,
        queue_size: usize,
        observer: Option<FailureObserver>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<PersistMessage>(queue_size.max(1));
        let counters = Arc::new(PersistCounters::default());
        let task_counters = counters.clone();

        tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(async {
                while let Some(message) = rx.recv().await {
                    match message {
                        PersistMessage::Write(job) => {
                            write_back(store.as_ref(), job, &task_counters, observer.as_ref()).await;
                        }
                        PersistMessage::Flush(ack) => {
                            let _ = ack.send(());
                        }
                        PersistMessage::Shutdown(ack) => {
                            rx.close();
                            while let Some(message) = rx.recv().await {
                                match message {
                                    PersistMessage::Write(job) => {
                                        write_back(store.as_ref(), job, &task_counters, observer.as_ref())
                                            .await;
                                    }
                                    PersistMessage::Flush(ack) | PersistMessage::Shutdown(ack) => {
                                        let _ = ack.send(());
                                    }
                                }
                            }
                            let _ = ack.send(());
                            break;
                        }
                    }
                }
            })
            .catch_unwind()
            .await;
            match result {
                Ok(()) => tracing::info!("Persist worker stopped"),
                Err(e) => tracing::error!(panic = ?e, "Persist worker panicked"),
            }
        });

        Self { tx, counters }
    }

    /// Queue an artifact for storage. Never blocks; returns false when the job was dropped.
    pub fn submit(&self, job: PersistJob) -> bool {
        match self.tx.try_send(PersistMessage::Write(job)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(PersistMessage::Write(job))) => {
                self.record_drop(&job, "queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(PersistMessage::Write(job))) => {
                self.record_drop(&job, "closed");
                false
            }
            Err(_) => false,
        }
    }

    fn record_drop(&self, job: &PersistJob, reason: &'static str) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("image_gateway_persist_failures_total", "reason" => reason).increment(1);
        tracing::warn!(
            request_id = %job.request_id,
            key = %job.key,
            reason,
            "Cache write-back dropped"
        );
    }

    /// Wait until every write queued before this call has been attempted
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(PersistMessage::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Stop accepting work and drain everything already queued
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(PersistMessage::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        let stats = self.stats();
        tracing::info!(
            stored = stats.stored,
            failed = stats.failed,
            dropped = stats.dropped,
            "Persist queue drained"
        );
    }

    pub fn stats(&self) -> PersistStats {
        PersistStats {
            stored: self.counters.stored.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn write_back(
    store: &dyn CacheStore,
    job: PersistJob,
    counters: &PersistCounters,
    observer: Option<&FailureObserver>,
) {
    let size = job.entry.bytes.len();
    let outcome = std::panic::AssertUnwindSafe(store.put(&job.key, job.entry))
        .catch_unwind()
        .await;

    let error = match outcome {
        Ok(Ok(())) => {
            counters.stored.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                request_id = %job.request_id,
                key = %job.key,
                size,
                backend = store.backend(),
                "Artifact persisted"
            );
            return;
        }
        Ok(Err(e)) => e,
        Err(_) => AppError::Persistence(format!("{} backend panicked during put", store.backend())),
    };

    counters.failed.fetch_add(1, Ordering::Relaxed);
    metrics::counter!("image_gateway_persist_failures_total", "reason" => "put_failed").increment(1);
    tracing::error!(
        request_id = %job.request_id,
        key = %job.key,
        backend = store.backend(),
        error = %error,
        "Cache write-back failed"
    );
    if let Some(observer) = observer {
        observer(&job.key, &error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        fn backend(&self) -> &str {
            "failing"
        }

        async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, AppError> {
            Ok(None)
        }

        async fn put(&self, _key: &CacheKey, _entry: CacheEntry) -> Result<(), AppError> {
            Err(AppError::Persistence("disk full".to_string()))
        }
    }

    struct PanickingStore;

    #[async_trait]
    impl CacheStore for PanickingStore {
        fn backend(&self) -> &str {
            "panicking"
        }

        async fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, AppError> {
            Ok(None)
        }

        async fn put(&self, _key: &CacheKey, _entry: CacheEntry) -> Result<(), AppError> {
            panic!("boom")
        }
    }

    fn job(suffix: &str) -> PersistJob {
        PersistJob {
            request_id: format!("req-{}", suffix),
            key: CacheKey::parse(&format!("images/low/1024x1024/1/{}", suffix)).unwrap(),
            entry: CacheEntry::new(vec![1u8, 2, 3], "image/png"),
        }
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_writes() {
        let store = Arc::new(MemoryCacheStore::new());
        let worker = PersistWorker::spawn(store.clone(), 16);

        assert!(worker.submit(job("a")));
        assert!(worker.submit(job("b")));
        worker.flush().await;

        assert_eq!(store.len(), 2);
        assert_eq!(worker.stats().stored, 2);
    }

    #[tokio::test]
    async fn test_failures_reach_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let observer: FailureObserver = Arc::new(move |key: &CacheKey, err: &AppError| {
            seen_clone
                .lock()
                .unwrap()
                .push((key.to_string(), err.to_string()));
        });

        let worker = PersistWorker::spawn_with_observer(Arc::new(FailingStore), 4, Some(observer));
        worker.submit(job("a"));
        worker.flush().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1.contains("disk full"));
        assert_eq!(worker.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_store_does_not_kill_worker() {
        let worker = PersistWorker::spawn(Arc::new(PanickingStore), 4);
        worker.submit(job("a"));
        worker.submit(job("b"));
        worker.flush().await;

        assert_eq!(worker.stats().failed, 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects() {
        let store = Arc::new(MemoryCacheStore::new());
        let worker = PersistWorker::spawn(store.clone(), 16);

        for i in 0..5 {
            worker.submit(job(&i.to_string()));
        }
        worker.shutdown().await;
        assert_eq!(store.len(), 5);

        assert!(!worker.submit(job("late")));
        assert_eq!(worker.stats().dropped, 1);
    }
}
