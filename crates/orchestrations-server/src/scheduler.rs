//! Timer-driven loop around the recurring scheduler.

use std::sync::Arc;
use std::time::Duration;

use orchestrations_core::scheduler::RecurringScheduler;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Tick every `interval` until `cancel` fires. Ticks run on the blocking pool
/// because the store is synchronous.
pub fn spawn_scheduler_loop(
    scheduler: Arc<RecurringScheduler>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_seconds = interval.as_secs(), "recurring scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let scheduler = Arc::clone(&scheduler);
            match tokio::task::spawn_blocking(move || scheduler.tick()).await {
                Ok(Ok(created)) if !created.is_empty() => {
                    info!(created = created.len(), "recurring instances scheduled");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(error = %e, "scheduler tick failed"),
                Err(e) => error!(error = %e, "scheduler tick panicked"),
            }
        }
        info!("recurring scheduler stopped");
    })
}
