//! The composite work queue the gateway talks to.
//!
//! Durable (Postgres) when the broker pool is usable, with the in-process
//! queue always standing by: a failed durable enqueue degrades that job to
//! the in-process path instead of dropping it, and a deployment without a
//! database runs entirely in-process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use miga_core::config::QueueConfig;
use miga_core::types::InboundJob;

use crate::error::{HandlerError, QueueError, Result};
use crate::memory::MemoryQueue;
use crate::pg::PgQueue;

/// Consumer contract. Handlers MUST be idempotent: the queue is
/// at-least-once and a job may be delivered more than once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: InboundJob) -> std::result::Result<(), HandlerError>;
}

pub struct WorkQueue {
    durable: Option<Arc<PgQueue>>,
    fallback: MemoryQueue,
    cfg: QueueConfig,
}

impl WorkQueue {
    /// Build the queue. When the durable backend cannot be initialised the
    /// queue starts in in-process mode.
    pub async fn connect(pool: Option<PgPool>, cfg: QueueConfig) -> Self {
        let durable = match pool {
            Some(pool) => {
                let pg = PgQueue::new(pool, cfg.clone());
                match pg.init().await {
                    Ok(()) => {
                        info!("durable queue ready");
                        Some(Arc::new(pg))
                    }
                    Err(e) => {
                        warn!(error = %e, "durable queue unavailable, using in-process fallback");
                        None
                    }
                }
            }
            None => None,
        };
        Self {
            durable,
            fallback: MemoryQueue::new(cfg.clone()),
            cfg,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    /// Enqueue one job. Overflow propagates (the gate answers 503); a
    /// durable backend error degrades this job to the in-process queue.
    pub async fn enqueue(&self, job: InboundJob) -> Result<()> {
        if let Some(pg) = &self.durable {
            match pg.enqueue(&job).await {
                Ok(_) => return Ok(()),
                Err(QueueError::Overflow) => return Err(QueueError::Overflow),
                Err(e) => {
                    warn!(error = %e, "durable enqueue failed, degrading to in-process queue");
                }
            }
        }
        self.fallback.enqueue(job)
    }

    /// Start the consumer tasks: pollers against the durable backend (when
    /// present) plus the in-process workers, all stopping on shutdown.
    pub fn start_workers(
        &self,
        handler: Arc<dyn JobHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = self.fallback.spawn_workers(Arc::clone(&handler), shutdown.clone());

        if let Some(pg) = &self.durable {
            for worker in 0..self.cfg.workers.max(1) {
                let pg = Arc::clone(pg);
                let handler = Arc::clone(&handler);
                let mut shutdown = shutdown.clone();
                let poll = Duration::from_millis(self.cfg.poll_interval_ms.max(50));
                handles.push(tokio::spawn(async move {
                    loop {
                        if *shutdown.borrow() {
                            info!(worker, "durable queue worker stopping");
                            break;
                        }
                        match pg.claim().await {
                            Ok(Some(claimed)) => {
                                let result = handler.handle(claimed.job).await;
                                let outcome = match result {
                                    Ok(()) => pg.complete(claimed.id).await,
                                    Err(e) => {
                                        pg.fail(claimed.id, claimed.attempts, &e.message, e.retryable)
                                            .await
                                    }
                                };
                                if let Err(e) = outcome {
                                    error!(job_id = claimed.id, error = %e, "queue bookkeeping failed");
                                }
                            }
                            Ok(None) => {
                                tokio::select! {
                                    _ = tokio::time::sleep(poll) => {}
                                    _ = shutdown.changed() => {}
                                }
                            }
                            Err(e) => {
                                warn!(worker, error = %e, "durable claim failed, backing off");
                                tokio::select! {
                                    _ = tokio::time::sleep(poll * 4) => {}
                                    _ = shutdown.changed() => {}
                                }
                            }
                        }
                    }
                }));
            }
        }
        handles
    }

    /// Durable backlog depth for health output; `None` in in-process mode.
    pub async fn depth(&self) -> Option<(i64, i64, i64)> {
        match &self.durable {
            Some(pg) => pg.depth().await.ok(),
            None => None,
        }
    }

    /// Hygiene sweep over the dead-letter set.
    pub async fn purge_dead(&self, older_than_days: i64) -> Result<u64> {
        match &self.durable {
            Some(pg) => {
                let horizon = chrono::Utc::now() - chrono::Duration::days(older_than_days);
                pg.purge_dead_before(horizon).await
            }
            None => Ok(0),
        }
    }
}
