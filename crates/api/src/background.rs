//! Store maintenance task

use monitor::now_ms;
use std::time::Duration;
use storage::StoreConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::SharedState;

/// Flush throttled count updates and reconcile with the backend until
/// `stop` turns true
pub fn spawn_maintenance(
    state: SharedState,
    config: &StoreConfig,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let flush_every = Duration::from_millis(config.throttle_ms.max(1));
    let reconcile_every = Duration::from_millis(config.reconcile_interval_ms.max(1));

    tokio::spawn(async move {
        let mut flush_tick = interval(flush_every);
        let mut reconcile_tick = interval(reconcile_every);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Store maintenance every {:?} (flush) / {:?} (reconcile)",
            flush_every, reconcile_every
        );

        loop {
            tokio::select! {
                _ = flush_tick.tick() => {
                    let mut state = state.write().await;
                    match state.monitor.flush_due(now_ms()) {
                        Ok(Some(applied)) => debug!("Flushed {} queued count updates", applied),
                        Ok(None) => {}
                        Err(e) => warn!("Count flush failed: {}", e),
                    }
                }
                _ = reconcile_tick.tick() => {
                    let mut state = state.write().await;
                    if let Err(e) = state.monitor.reconcile() {
                        warn!("Count reconciliation failed: {}", e);
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Store maintenance stopped");
    })
}
