//! Concurrency-bounded batch scheduling.
//!
//! The task list is partitioned into chunks of the current bound and each
//! chunk is awaited as a whole before the next begins. Thermal feedback is
//! consulted between chunks only: a pause recommendation holds the driver,
//! a reduce recommendation lowers the bound for subsequent chunks.

use crate::tasks::TaskKey;
use crate::thermal::{ThermalAction, ThermalMonitor};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;

/// Lower and upper bounds for the derived default concurrency.
const MIN_DEFAULT_CONCURRENCY: usize = 1;
const MAX_DEFAULT_CONCURRENCY: usize = 4;

/// Poll interval while the driver is held by a pause recommendation.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default concurrency bound for this machine.
pub fn default_concurrency() -> usize {
    default_concurrency_for(num_cpus::get())
}

/// Derives the default bound from a core count: one core is left free, and
/// the result is clamped to [1, 4].
pub fn default_concurrency_for(cores: usize) -> usize {
    cores
        .saturating_sub(1)
        .clamp(MIN_DEFAULT_CONCURRENCY, MAX_DEFAULT_CONCURRENCY)
}

/// Drives every task through `spawn_task`, at most `initial_bound` at a time.
///
/// Each chunk runs concurrently on a `JoinSet` and is fully awaited before
/// the next chunk starts. `spawn_task` is called exactly once per key, in
/// order; cancellation short-circuiting is the callback's responsibility so
/// that every task still reaches a terminal state.
pub async fn drive<F, Fut>(
    keys: Vec<TaskKey>,
    initial_bound: usize,
    thermal: &ThermalMonitor,
    cancelled: &AtomicBool,
    mut spawn_task: F,
) where
    F: FnMut(TaskKey) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut bound = initial_bound.max(1);
    let mut index = 0;

    while index < keys.len() {
        if !cancelled.load(Ordering::SeqCst) {
            match thermal.current_status().recommendation {
                ThermalAction::Pause => {
                    tracing::info!("thermal pause recommended, holding batch");
                    wait_for_resume(thermal, cancelled).await;
                }
                ThermalAction::ReduceConcurrency => {
                    if bound > 1 {
                        bound -= 1;
                        tracing::debug!("thermal feedback lowered concurrency to {}", bound);
                    }
                }
                _ => {}
            }
        }

        let end = (index + bound).min(keys.len());
        let mut chunk = JoinSet::new();
        for key in &keys[index..end] {
            chunk.spawn(spawn_task(key.clone()));
        }
        while let Some(joined) = chunk.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("compression task panicked: {}", e);
            }
        }
        index = end;
    }
}

/// Holds until the recommendation leaves the pause band or the batch is
/// cancelled.
async fn wait_for_resume(thermal: &ThermalMonitor, cancelled: &AtomicBool) {
    while thermal.current_status().recommendation == ThermalAction::Pause
        && !cancelled.load(Ordering::SeqCst)
    {
        tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
    }
}
