//! Rate-limited cycle loop

use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::pipeline::{process_frame_shared, MonitorHandle};
use crate::source::FrameSource;
use crate::{now_ms, MonitorError};

/// Pull frames from `source` and process one per tick.
///
/// Missed ticks are skipped rather than bursted. While the monitor is
/// stopped the loop idles without touching the source. Ends when `stop`
/// turns true or the source runs dry. Returns the number of cycles
/// processed.
pub async fn run_cycles<M, S>(
    shared: Arc<RwLock<M>>,
    mut source: S,
    mut stop: watch::Receiver<bool>,
) -> Result<u64, MonitorError>
where
    M: MonitorHandle,
    S: FrameSource,
{
    let period = {
        let mut guard = shared.write().await;
        guard.monitor().config().cycle_interval()
    };
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Cycle loop running every {:?}", period);

    let mut processed = 0u64;
    let mut idle = false;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *stop.borrow() {
            info!("Cycle loop stop requested");
            break;
        }

        let running = shared.write().await.monitor().is_running();
        if !running {
            if !idle {
                info!("Monitor stopped, cycle loop idle");
                idle = true;
            }
            continue;
        }
        idle = false;

        // Await the source without holding the lock
        let Some(frame) = source.next_frame().await? else {
            info!("Frame source exhausted");
            break;
        };

        match process_frame_shared(&shared, frame, now_ms()).await {
            Ok(_) => processed += 1,
            Err(MonitorError::NotRunning) => debug!("Monitor stopped mid-cycle, frame dropped"),
            Err(e) => warn!("Cycle failed: {}", e),
        }
    }

    info!("Cycle loop finished after {} cycles", processed);
    Ok(processed)
}
