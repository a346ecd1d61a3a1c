//! Persistence worker - writes accepted events off the request path
//!
//! The evaluator updates the roster synchronously and enqueues the event here.
//! The worker appends to the event store, retrying with backoff; replaying an
//! event is harmless because the tracker ignores event ids it has seen.

use crate::domain::types::EntryEvent;
use crate::infra::metrics::Metrics;
use crate::io::event_log::EventStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Upper bound for a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// An accepted event waiting to be persisted
#[derive(Debug)]
pub struct PersistCmd {
    pub event: EntryEvent,
    /// When the command was enqueued (for queue delay logging)
    pub enqueued_at: Instant,
}

impl PersistCmd {
    pub fn new(event: EntryEvent) -> Self {
        Self { event, enqueued_at: Instant::now() }
    }
}

/// Retry settings for the worker
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Sleep before the first retry; doubles on each further retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, backoff: Duration::from_millis(200) }
    }
}

/// Worker that appends accepted events to the store
pub struct PersistWorker {
    store: Arc<dyn EventStore>,
    cmd_rx: mpsc::Receiver<PersistCmd>,
    metrics: Arc<Metrics>,
    retry: RetryPolicy,
}

impl PersistWorker {
    pub fn new(
        store: Arc<dyn EventStore>,
        cmd_rx: mpsc::Receiver<PersistCmd>,
        metrics: Arc<Metrics>,
        retry: RetryPolicy,
    ) -> Self {
        Self { store, cmd_rx, metrics, retry }
    }

    /// Run the worker until every sender is dropped
    pub async fn run(mut self) {
        info!("persist_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            let queue_delay_us = cmd.enqueued_at.elapsed().as_micros() as u64;
            if self.persist(&cmd.event).await {
                self.metrics.record_persisted();
                info!(
                    event_id = %cmd.event.event_id,
                    subject = %cmd.event.subject_id,
                    queue_delay_us = %queue_delay_us,
                    "event_persisted"
                );
            } else {
                self.metrics.record_persist_failure();
            }
        }

        info!("persist_worker_stopped");
    }

    /// Append one event, retrying on failure. Returns true once written.
    async fn persist(&self, event: &EntryEvent) -> bool {
        let mut backoff = self.retry.backoff;
        let mut attempt = 0u32;
        loop {
            match self.store.append(event).await {
                Ok(()) => return true,
                Err(e) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    self.metrics.record_persist_retry();
                    warn!(
                        event_id = %event.event_id,
                        attempt = %attempt,
                        backoff_ms = %backoff.as_millis(),
                        error = %format!("{e:#}"),
                        "event_persist_retry"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    error!(
                        event_id = %event.event_id,
                        subject = %event.subject_id,
                        attempts = %(attempt + 1),
                        error = %format!("{e:#}"),
                        "event_persist_failed"
                    );
                    return false;
                }
            }
        }
    }
}

/// Create a persistence channel and worker
///
/// Returns the sender (for the evaluator) and the worker (to be spawned)
pub fn create_persist_worker(
    store: Arc<dyn EventStore>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
    retry: RetryPolicy,
) -> (mpsc::Sender<PersistCmd>, PersistWorker) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer_size);
    let worker = PersistWorker::new(store, cmd_rx, metrics, retry);
    (cmd_tx, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{EntryKind, SignalScores, SubjectId};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Store that fails the first `failures` appends
    struct FlakyStore {
        failures: Mutex<u32>,
        written: Mutex<Vec<EntryEvent>>,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self { failures: Mutex::new(failures), written: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl EventStore for FlakyStore {
        async fn append(&self, event: &EntryEvent) -> anyhow::Result<()> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("disk unavailable");
            }
            self.written.lock().push(event.clone());
            Ok(())
        }
    }

    fn event(subject: &str) -> EntryEvent {
        EntryEvent::new(
            "main",
            SubjectId::new(subject),
            EntryKind::Entry,
            95,
            true,
            false,
            SignalScores::default(),
        )
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy { max_retries, backoff: Duration::from_millis(1) }
    }

    #[tokio::test]
    async fn test_persists_in_order() {
        let store = Arc::new(FlakyStore::new(0));
        let metrics = Arc::new(Metrics::new());
        let (tx, worker) = create_persist_worker(store.clone(), metrics.clone(), 8, fast_retry(0));

        let e1 = event("alice");
        let e2 = event("bob");
        tx.send(PersistCmd::new(e1.clone())).await.unwrap();
        tx.send(PersistCmd::new(e2.clone())).await.unwrap();
        drop(tx);
        worker.run().await;

        assert_eq!(*store.written.lock(), vec![e1, e2]);
        assert_eq!(metrics.report().events_persisted_total, 2);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let store = Arc::new(FlakyStore::new(2));
        let metrics = Arc::new(Metrics::new());
        let (tx, worker) = create_persist_worker(store.clone(), metrics.clone(), 8, fast_retry(3));

        tx.send(PersistCmd::new(event("alice"))).await.unwrap();
        drop(tx);
        worker.run().await;

        let summary = metrics.report();
        assert_eq!(store.written.lock().len(), 1);
        assert_eq!(summary.persist_retries_total, 2);
        assert_eq!(summary.persist_failures_total, 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let store = Arc::new(FlakyStore::new(10));
        let metrics = Arc::new(Metrics::new());
        let (tx, worker) = create_persist_worker(store.clone(), metrics.clone(), 8, fast_retry(2));

        tx.send(PersistCmd::new(event("alice"))).await.unwrap();
        drop(tx);
        worker.run().await;

        let summary = metrics.report();
        assert!(store.written.lock().is_empty());
        assert_eq!(summary.persist_retries_total, 2);
        assert_eq!(summary.persist_failures_total, 1);
        assert_eq!(*store.failures.lock(), 7);
    }
}
