//! In-process fallback queue: a bounded channel drained by worker tasks.
//! Delivery guarantees are weaker than the durable queue (jobs die with the
//! process); retries happen inline with the same backoff policy.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

use miga_core::config::QueueConfig;
use miga_core::types::InboundJob;

use crate::error::{QueueError, Result};
use crate::queue::JobHandler;

pub struct MemoryQueue {
    tx: mpsc::Sender<InboundJob>,
    rx: Arc<Mutex<mpsc::Receiver<InboundJob>>>,
    cfg: QueueConfig,
}

impl MemoryQueue {
    pub fn new(cfg: QueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            cfg,
        }
    }

    /// Non-blocking enqueue; a full channel surfaces as overflow so the
    /// webhook gate can answer 503.
    pub fn enqueue(&self, job: InboundJob) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Overflow,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Spawn `workers` consumer tasks sharing the receiver.
    pub fn spawn_workers(
        &self,
        handler: Arc<dyn JobHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.cfg.workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&self.rx);
                let handler = Arc::clone(&handler);
                let mut shutdown = shutdown.clone();
                let max_attempts = self.cfg.max_attempts;
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                job = rx.recv() => job,
                                _ = shutdown.changed() => {
                                    if *shutdown.borrow() { None } else { continue }
                                }
                            }
                        };
                        let Some(job) = job else {
                            info!(worker, "in-process queue worker stopping");
                            break;
                        };
                        run_with_retries(&*handler, job, max_attempts).await;
                    }
                })
            })
            .collect()
    }
}

/// Inline retry loop mirroring the durable queue's backoff policy.
async fn run_with_retries(handler: &dyn JobHandler, job: InboundJob, max_attempts: i32) {
    for attempt in 1..=max_attempts.max(1) {
        match handler.handle(job.clone()).await {
            Ok(()) => return,
            Err(e) if e.retryable && attempt < max_attempts => {
                let backoff = std::time::Duration::from_secs(2u64.pow(attempt as u32));
                warn!(
                    conversation_id = job.conversation_id,
                    attempt,
                    error = %e,
                    "job failed, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                warn!(
                    conversation_id = job.conversation_id,
                    attempt,
                    error = %e,
                    "job dropped by in-process queue"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(n: i64) -> InboundJob {
        InboundJob {
            conversation_id: n,
            account_id: 1,
            contact_id: None,
            content: format!("m{n}"),
            received_at: Utc::now(),
        }
    }

    fn cfg(capacity: usize) -> QueueConfig {
        QueueConfig {
            capacity,
            workers: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn overflow_is_reported_when_full() {
        let queue = MemoryQueue::new(cfg(2));
        queue.enqueue(job(1)).unwrap();
        queue.enqueue(job(2)).unwrap();
        assert!(matches!(queue.enqueue(job(3)), Err(QueueError::Overflow)));
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl JobHandler for Counter {
        async fn handle(&self, _job: InboundJob) -> std::result::Result<(), HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn workers_drain_the_channel() {
        let queue = MemoryQueue::new(cfg(16));
        let handler = Arc::new(Counter(AtomicUsize::new(0)));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _workers = queue.spawn_workers(handler.clone(), shutdown_rx);

        for n in 0..8 {
            queue.enqueue(job(n)).unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(handler.0.load(Ordering::SeqCst), 8);
    }
}
