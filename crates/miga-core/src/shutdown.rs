//! Graceful-shutdown registry. Components register a named async handler
//! with a priority; on SIGTERM/SIGINT the handlers run in priority order
//! (highest first, `1` = last to close) under a per-handler deadline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{error, info, warn};

type HookFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type Hook = Box<dyn FnOnce() -> HookFuture + Send>;

struct Entry {
    name: String,
    priority: u8,
    deadline: Duration,
    hook: Hook,
}

/// Collects shutdown handlers during startup and drains them once at exit.
#[derive(Default)]
pub struct ShutdownRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. `priority` orders execution (higher runs earlier,
    /// `1` closes last); `deadline` bounds how long the handler may take.
    pub fn register<F, Fut>(&self, name: &str, priority: u8, deadline: Duration, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let mut entries = self.entries.lock().unwrap();
        entries.push(Entry {
            name: name.to_string(),
            priority,
            deadline,
            hook: Box::new(move || Box::pin(f())),
        });
    }

    /// Run every registered handler. A handler that fails or overruns its
    /// deadline is logged and skipped; shutdown never blocks indefinitely.
    pub async fn run(self) {
        let mut entries = self.entries.into_inner().unwrap_or_default();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));

        for entry in entries {
            info!(handler = %entry.name, priority = entry.priority, "running shutdown handler");
            match tokio::time::timeout(entry.deadline, (entry.hook)()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(handler = %entry.name, error = %e, "shutdown handler failed, skipping")
                }
                Err(_) => {
                    warn!(handler = %entry.name, "shutdown handler missed its deadline, skipping")
                }
            }
        }
        info!("shutdown complete");
    }
}

/// Resolve when the process receives SIGTERM or SIGINT.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("SIGINT received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn handlers_run_highest_priority_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = ShutdownRegistry::new();

        for (name, prio) in [("consumers", 3u8), ("http", 9u8), ("schedulers", 1u8)] {
            let order = Arc::clone(&order);
            registry.register(name, prio, Duration::from_secs(1), move || async move {
                order.lock().unwrap().push(name.to_string());
                Ok(())
            });
        }

        registry.run().await;
        let ran = order.lock().unwrap().clone();
        assert_eq!(ran, vec!["http", "consumers", "schedulers"]);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_the_rest() {
        let ran = Arc::new(AtomicUsize::new(0));
        let registry = ShutdownRegistry::new();

        registry.register("boom", 5, Duration::from_secs(1), || async {
            Err("broken".to_string())
        });
        registry.register("slow", 4, Duration::from_millis(20), || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        let counter = Arc::clone(&ran);
        registry.register("last", 1, Duration::from_secs(1), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        registry.run().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
