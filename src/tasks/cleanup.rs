//! Cache Maintenance Task
//!
//! Background task that removes expired entries and reclaims capacity.
//! It wakes on a configured interval, and immediately when a write leaves
//! the store over its byte budget; overshoot between wakeups is expected
//! and bounded by one interval's worth of writes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::CacheStore;

/// Spawns the maintenance task.
///
/// Each pass purges entries whose TTL elapsed, then asks the eviction
/// policy for victims until the store is back under `max_bytes`. The task
/// exits when the shutdown signal flips.
///
/// # Arguments
/// * `cache` - shared store
/// * `interval` - time between passes
/// * `pressure` - notified by the dispatcher when a SET overshoots the budget
/// * `shutdown` - cooperative stop signal
pub fn spawn_cleanup_task(
    cache: Arc<RwLock<CacheStore>>,
    interval: Duration,
    pressure: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval = ?interval, "cache maintenance task started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of a tokio interval fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = pressure.notified() => {}
                _ = shutdown.changed() => break,
            }

            let (expired, evicted) = {
                let mut cache = cache.write().await;
                let expired = cache.purge_expired();
                let evicted = if cache.is_over_capacity() {
                    cache.evict_to_capacity()
                } else {
                    0
                };
                (expired, evicted)
            };

            if expired > 0 || evicted > 0 {
                info!(expired, evicted, "cache maintenance pass");
            } else {
                debug!("cache maintenance pass found nothing to do");
            }
        }

        info!("cache maintenance task stopped");
    })
}
