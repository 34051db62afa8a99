//! Background loops: config refresh + projection, vector TTL cleanup,
//! action expiry sweep, dead-letter purge, and summarized-message
//! retention. Each loop ticks on its own interval and stops on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use miga_confighub::projection;

use crate::app::AppState;

/// Refresh the config snapshot and reproject it on every tick.
pub fn spawn_config_refresh(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.confighub.sync_interval_minutes.max(1) * 60);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; startup already refreshed.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = state.hub.refresh().await;
                    state.registry.update_routing(snapshot.model_routing.clone());

                    let projected = if state.config.confighub.auto_discover {
                        projection::project_auto(
                            &snapshot,
                            state.hub.last_raw(),
                            state.llm.as_ref(),
                            &state.vector,
                            &state.config.confighub,
                        )
                        .await
                    } else {
                        projection::project(&snapshot, &state.vector, &state.config.confighub).await
                    };
                    if let Err(e) = projected {
                        warn!(error = %e, "config projection failed, previous rows remain");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("config refresh loop stopping");
                        break;
                    }
                }
            }
        }
    })
}

/// Periodically drop expired vector rows and cache entries.
pub fn spawn_vector_cleanup(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.vector.cleanup_interval_secs.max(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = state.vector.cleanup_expired().await {
                        warn!(error = %e, "vector cleanup failed");
                    }
                    if let Err(e) = state.memory.cleanup_summarized().await {
                        warn!(error = %e, "summarized-message retention sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("vector cleanup loop stopping");
                        break;
                    }
                }
            }
        }
    })
}

/// Expire stale pending actions and purge old dead-letter jobs.
pub fn spawn_maintenance_sweep(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.actions.expiry_sweep_interval_secs.max(30));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = state.actions.expire_stale().await {
                        warn!(error = %e, "action expiry sweep failed");
                    }
                    if let Err(e) = state.queue.purge_dead(7).await {
                        warn!(error = %e, "dead-letter purge failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("maintenance sweep stopping");
                        break;
                    }
                }
            }
        }
    })
}
