//! Supervised periodic tasks.
//!
//! The controller's background loops (scale-up, GC, expiration) are
//! spawned through [`spawn_periodic`]: one tokio task per loop, all
//! sharing a single shutdown watch. A task never overlaps with itself —
//! when the work overruns the period, missed ticks are skipped and
//! counted rather than queued.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Runs `work` every `interval` until `shutdown` fires. The first tick
/// runs immediately.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut work: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;
        let mut ticks_skipped: u64 = 0;
        info!(task = name, interval_ms = interval.as_millis() as u64, "periodic task started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            ticks += 1;
            let started = tokio::time::Instant::now();
            work().await;
            let elapsed = started.elapsed();
            if elapsed > interval {
                ticks_skipped += (elapsed.as_nanos() / interval.as_nanos().max(1)) as u64;
                warn!(
                    task = name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    ticks_skipped,
                    "tick overran its period"
                );
            }
        }
        info!(task = name, ticks, ticks_skipped, "periodic task stopped");
    })
}
