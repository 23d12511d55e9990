//! Batch progress aggregation and smoothing.
//!
//! Raw subprocess progress is miscalibrated near completion: it can sit at
//! 99% for seconds before the final flush. The aggregator owns the batch's
//! task table, throttles per-task emissions, synthesizes a slow creep while
//! a task is stuck near the ceiling, and produces periodic batch snapshots.

use crate::errors::CompressionError;
use crate::tasks::{unix_ms_now, CompressionTask, TaskKey, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Smoothing parameters applied to every task in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingPolicy {
    /// Minimum wall-clock time between emissions for the batch.
    pub min_emit_interval: Duration,
    /// Emitting early is allowed when the change exceeds this delta.
    pub min_delta: f32,
    /// Raw progress at or above this value is treated as "near the ceiling".
    pub ceiling_threshold: f32,
    /// How long raw progress must sit unchanged near the ceiling before the
    /// displayed value starts creeping.
    pub ceiling_hold: Duration,
    /// Creep added per observation while stuck.
    pub ceiling_creep: f32,
    /// The creeping value never exceeds this cap; only a real completion
    /// reports 100.
    pub ceiling_cap: f32,
}

impl Default for SmoothingPolicy {
    fn default() -> Self {
        Self {
            min_emit_interval: Duration::from_millis(300),
            min_delta: 1.0,
            ceiling_threshold: 99.0,
            ceiling_hold: Duration::from_secs(3),
            ceiling_creep: 0.1,
            ceiling_cap: 99.5,
        }
    }
}

/// Fixed per-task duration heuristic used for the batch ETA.
const TASK_SECONDS_ESTIMATE: u64 = 30;

/// Periodic batch-level progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub overall_progress: f32,
    pub estimated_time_remaining_secs: u64,
}

/// Per-running-task smoothing state.
#[derive(Debug, Clone)]
struct TaskTrack {
    raw: f32,
    displayed: f32,
    last_raw_change: Instant,
}

/// Owns one batch's task table and smoothing state.
///
/// A fresh aggregator is constructed for every batch; state is never carried
/// across batches.
#[derive(Debug)]
pub struct ProgressAggregator {
    policy: SmoothingPolicy,
    tasks: HashMap<TaskKey, CompressionTask>,
    running: HashMap<TaskKey, TaskTrack>,
    last_emit: Option<Instant>,
}

/// Shared handle to the aggregator; progress callbacks run on many tasks.
pub type SharedAggregator = Arc<Mutex<ProgressAggregator>>;

pub fn new_shared_aggregator(policy: SmoothingPolicy) -> SharedAggregator {
    Arc::new(Mutex::new(ProgressAggregator::new(policy)))
}

impl ProgressAggregator {
    pub fn new(policy: SmoothingPolicy) -> Self {
        Self {
            policy,
            tasks: HashMap::new(),
            running: HashMap::new(),
            last_emit: None,
        }
    }

    /// Seeds the full task universe at batch start.
    pub fn seed(&mut self, tasks: Vec<CompressionTask>) {
        for task in tasks {
            self.tasks.insert(task.key.clone(), task);
        }
    }

    pub fn task(&self, key: &TaskKey) -> Option<&CompressionTask> {
        self.tasks.get(key)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &CompressionTask> {
        self.tasks.values()
    }

    /// Keys of tasks currently in `Compressing`.
    pub fn running_keys(&self) -> Vec<TaskKey> {
        self.running.keys().cloned().collect()
    }

    /// Keys of tasks that have not reached a terminal state.
    pub fn non_terminal_keys(&self) -> Vec<TaskKey> {
        self.tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.key.clone())
            .collect()
    }

    /// Transitions a task from `Pending` to `Compressing` at subprocess start.
    pub fn mark_compressing(&mut self, key: &TaskKey, now: Instant) -> bool {
        let Some(task) = self.tasks.get_mut(key) else {
            return false;
        };
        if task.status != TaskStatus::Pending {
            return false;
        }
        task.status = TaskStatus::Compressing;
        task.started_at_unix_ms = Some(unix_ms_now());
        self.running.insert(
            key.clone(),
            TaskTrack {
                raw: 0.0,
                displayed: 0.0,
                last_raw_change: now,
            },
        );
        true
    }

    /// Records raw progress for a running task.
    ///
    /// Returns the smoothed value to emit, or `None` when the update is
    /// suppressed by the throttle. Updates for terminal or unknown tasks are
    /// ignored.
    pub fn update_progress(&mut self, key: &TaskKey, raw: f32, now: Instant) -> Option<f32> {
        let task = self.tasks.get_mut(key)?;
        if task.status != TaskStatus::Compressing {
            return None;
        }
        let track = self.running.get_mut(key)?;

        let raw = raw.clamp(0.0, 100.0);
        if raw > track.raw {
            track.raw = raw;
            track.last_raw_change = now;
        }

        let candidate = if track.raw >= self.policy.ceiling_threshold
            && now.duration_since(track.last_raw_change) > self.policy.ceiling_hold
        {
            (track.displayed + self.policy.ceiling_creep).min(self.policy.ceiling_cap)
        } else {
            track.raw.max(track.displayed)
        };

        let interval_elapsed = self
            .last_emit
            .map(|t| now.duration_since(t) >= self.policy.min_emit_interval)
            .unwrap_or(true);
        let delta_exceeded = candidate - track.displayed >= self.policy.min_delta;

        if !interval_elapsed && !delta_exceeded {
            return None;
        }

        track.displayed = candidate;
        task.progress = candidate;
        self.last_emit = Some(now);
        Some(candidate)
    }

    /// Applies a terminal transition.
    ///
    /// Terminal states are absorbing: returns false (and changes nothing)
    /// when the task is already terminal or unknown. A completed task jumps
    /// to 100 immediately regardless of the smoothed value.
    pub fn mark_terminal(
        &mut self,
        key: &TaskKey,
        status: TaskStatus,
        error: Option<&CompressionError>,
    ) -> bool {
        if !status.is_terminal() {
            return false;
        }
        let Some(task) = self.tasks.get_mut(key) else {
            return false;
        };
        if task.status.is_terminal() {
            return false;
        }

        task.status = status;
        if status == TaskStatus::Completed {
            task.progress = 100.0;
        }
        task.error = error.map(|e| e.to_string());
        self.running.remove(key);
        true
    }

    /// Computes the batch snapshot: counters, mean completion, and the coarse
    /// per-task-estimate ETA.
    pub fn snapshot(&self) -> BatchSnapshot {
        let total = self.tasks.len();
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut cancelled = 0usize;
        let mut progress_sum = 0.0f64;

        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed => failed += 1,
                TaskStatus::Cancelled => cancelled += 1,
                _ => {}
            }
            progress_sum += if task.status.is_terminal() {
                100.0
            } else {
                f64::from(task.progress)
            };
        }

        let overall_progress = if total == 0 {
            0.0
        } else {
            (progress_sum / total as f64) as f32
        };
        let non_terminal = total - completed - failed - cancelled;

        BatchSnapshot {
            total_tasks: total,
            completed_tasks: completed,
            failed_tasks: failed,
            cancelled_tasks: cancelled,
            overall_progress,
            estimated_time_remaining_secs: TASK_SECONDS_ESTIMATE * non_terminal as u64,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn task(n: usize) -> CompressionTask {
        CompressionTask::new(
            TaskKey::new(format!("/v/clip{}.mp4", n), "web-standard"),
            true,
            PathBuf::from(format!("/out/clip{}_web-standard.mp4", n)),
        )
    }

    fn seeded(n: usize) -> (ProgressAggregator, Vec<TaskKey>) {
        let tasks: Vec<CompressionTask> = (0..n).map(task).collect();
        let keys: Vec<TaskKey> = tasks.iter().map(|t| t.key.clone()).collect();
        let mut agg = ProgressAggregator::new(SmoothingPolicy::default());
        agg.seed(tasks);
        (agg, keys)
    }

    #[test]
    fn test_mark_compressing_only_from_pending() {
        let (mut agg, keys) = seeded(1);
        let now = Instant::now();

        assert!(agg.mark_compressing(&keys[0], now));
        assert!(!agg.mark_compressing(&keys[0], now));
        assert_eq!(agg.task(&keys[0]).map(|t| t.status), Some(TaskStatus::Compressing));
        assert!(agg.task(&keys[0]).and_then(|t| t.started_at_unix_ms).is_some());
    }

    #[test]
    fn test_update_ignored_for_pending_task() {
        let (mut agg, keys) = seeded(1);
        assert_eq!(agg.update_progress(&keys[0], 50.0, Instant::now()), None);
    }

    #[test]
    fn test_first_update_emits() {
        let (mut agg, keys) = seeded(1);
        let now = Instant::now();
        agg.mark_compressing(&keys[0], now);

        assert_eq!(agg.update_progress(&keys[0], 10.0, now), Some(10.0));
    }

    #[test]
    fn test_throttle_suppresses_small_fast_updates() {
        let (mut agg, keys) = seeded(1);
        let base = Instant::now();
        agg.mark_compressing(&keys[0], base);

        assert!(agg.update_progress(&keys[0], 10.0, base).is_some());
        // 50ms later, +0.2%: below both the interval and the delta.
        let suppressed = agg.update_progress(&keys[0], 10.2, base + Duration::from_millis(50));
        assert_eq!(suppressed, None);
        // Same instant, but a large jump exceeds min_delta and emits early.
        let emitted = agg.update_progress(&keys[0], 40.0, base + Duration::from_millis(60));
        assert_eq!(emitted, Some(40.0));
        // After the interval elapses, even a small change emits.
        let late = agg.update_progress(&keys[0], 40.3, base + Duration::from_millis(500));
        assert_eq!(late, Some(40.3));
    }

    #[test]
    fn test_displayed_progress_is_monotonic() {
        let (mut agg, keys) = seeded(1);
        let base = Instant::now();
        agg.mark_compressing(&keys[0], base);

        agg.update_progress(&keys[0], 50.0, base);
        // A lower raw value never drags the displayed value backwards.
        let next = agg.update_progress(&keys[0], 30.0, base + Duration::from_secs(1));
        assert_eq!(next, Some(50.0));
    }

    #[test]
    fn test_ceiling_creep_and_cap() {
        let (mut agg, keys) = seeded(1);
        let base = Instant::now();
        agg.mark_compressing(&keys[0], base);

        agg.update_progress(&keys[0], 99.0, base);

        // Stuck at 99 for longer than the hold window: displayed creeps.
        let mut at = base + Duration::from_secs(4);
        let creeping = agg.update_progress(&keys[0], 99.0, at);
        assert_eq!(creeping, Some(99.1));

        // Keep observing; the creep never exceeds the cap.
        for _ in 0..20 {
            at += Duration::from_secs(1);
            agg.update_progress(&keys[0], 99.0, at);
        }
        let displayed = agg.task(&keys[0]).map(|t| t.progress);
        assert_eq!(displayed, Some(99.5));
    }

    #[test]
    fn test_completion_reports_100_immediately() {
        let (mut agg, keys) = seeded(1);
        let base = Instant::now();
        agg.mark_compressing(&keys[0], base);
        agg.update_progress(&keys[0], 99.0, base);

        assert!(agg.mark_terminal(&keys[0], TaskStatus::Completed, None));
        assert_eq!(agg.task(&keys[0]).map(|t| t.progress), Some(100.0));
        assert!(agg.running_keys().is_empty());
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let (mut agg, keys) = seeded(1);
        agg.mark_compressing(&keys[0], Instant::now());

        assert!(agg.mark_terminal(&keys[0], TaskStatus::Failed, Some(&CompressionError::transcoder("boom"))));
        assert!(!agg.mark_terminal(&keys[0], TaskStatus::Completed, None));
        assert!(!agg.mark_terminal(&keys[0], TaskStatus::Cancelled, None));
        assert_eq!(agg.task(&keys[0]).map(|t| t.status), Some(TaskStatus::Failed));
        // Progress updates after a terminal transition are ignored.
        assert_eq!(agg.update_progress(&keys[0], 80.0, Instant::now()), None);
    }

    #[test]
    fn test_snapshot_mean_and_eta() {
        let (mut agg, keys) = seeded(4);
        let now = Instant::now();
        agg.mark_compressing(&keys[0], now);
        agg.update_progress(&keys[0], 50.0, now);
        agg.mark_compressing(&keys[1], now);
        agg.mark_terminal(&keys[1], TaskStatus::Completed, None);
        agg.mark_compressing(&keys[2], now);
        agg.mark_terminal(&keys[2], TaskStatus::Failed, None);
        // keys[3] stays pending at 0.

        let snap = agg.snapshot();
        assert_eq!(snap.total_tasks, 4);
        assert_eq!(snap.completed_tasks, 1);
        assert_eq!(snap.failed_tasks, 1);
        assert_eq!(snap.cancelled_tasks, 0);
        // (50 + 100 + 100 + 0) / 4
        assert!((snap.overall_progress - 62.5).abs() < 0.01);
        assert_eq!(snap.estimated_time_remaining_secs, 60);
    }

    #[test]
    fn test_empty_snapshot() {
        let agg = ProgressAggregator::new(SmoothingPolicy::default());
        let snap = agg.snapshot();
        assert_eq!(snap.total_tasks, 0);
        assert_eq!(snap.overall_progress, 0.0);
        assert_eq!(snap.estimated_time_remaining_secs, 0);
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let snap = BatchSnapshot {
            total_tasks: 8,
            completed_tasks: 3,
            failed_tasks: 1,
            cancelled_tasks: 0,
            overall_progress: 51.25,
            estimated_time_remaining_secs: 120,
        };
        let json = serde_json::to_string(&snap).expect("serialization should succeed");
        let parsed: BatchSnapshot = serde_json::from_str(&json).expect("round trip");
        assert_eq!(snap, parsed);
    }

    // Random operation sequences never violate the batch counter invariant
    // (`completed + failed + cancelled <= total`) and never transition a task
    // out of a terminal state.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_counters_and_terminality(
            ops in prop::collection::vec((0usize..3, 0u8..4), 1..40),
        ) {
            let (mut agg, keys) = seeded(3);
            let base = Instant::now();
            let mut terminal_seen: HashMap<TaskKey, TaskStatus> = HashMap::new();

            for (step, (task_idx, op)) in ops.into_iter().enumerate() {
                let key = &keys[task_idx];
                let now = base + Duration::from_millis(step as u64 * 100);
                match op {
                    0 => { agg.mark_compressing(key, now); }
                    1 => { agg.update_progress(key, (step as f32 * 7.0) % 100.0, now); }
                    2 => {
                        if agg.mark_terminal(key, TaskStatus::Completed, None) {
                            terminal_seen.insert(key.clone(), TaskStatus::Completed);
                        }
                    }
                    _ => {
                        if agg.mark_terminal(key, TaskStatus::Cancelled, None) {
                            terminal_seen.insert(key.clone(), TaskStatus::Cancelled);
                        }
                    }
                }

                let snap = agg.snapshot();
                prop_assert!(
                    snap.completed_tasks + snap.failed_tasks + snap.cancelled_tasks
                        <= snap.total_tasks
                );
                prop_assert!(snap.overall_progress >= 0.0 && snap.overall_progress <= 100.0);

                // Once a task is terminal, its status never changes again.
                for (key, status) in &terminal_seen {
                    prop_assert_eq!(agg.task(key).map(|t| t.status), Some(*status));
                }
            }
        }
    }
}
