//! Thermal monitoring and admission-control recommendations.
//!
//! A background sampler estimates CPU usage from the 1-minute load average
//! and synthesizes a temperature estimate from it (no direct sensor access).
//! The blended pressure score drives sticky throttling recommendations with
//! a cooldown window to prevent oscillation.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Pressure at or above which a pause is recommended.
pub const PAUSE_PRESSURE: f32 = 90.0;
/// Pressure at or above which reduced concurrency is recommended.
pub const REDUCE_PRESSURE: f32 = 70.0;
/// Pressure at or below which resuming is recommended.
pub const RESUME_PRESSURE: f32 = 30.0;

/// Synthetic temperature model bounds (degrees Celsius).
const TEMP_BASE: f32 = 35.0;
const TEMP_RANGE: f32 = 60.0;

/// Recommended scheduler action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalAction {
    Normal,
    ReduceConcurrency,
    Pause,
    Resume,
}

impl Default for ThermalAction {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for ThermalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThermalAction::Normal => write!(f, "normal"),
            ThermalAction::ReduceConcurrency => write!(f, "reduce_concurrency"),
            ThermalAction::Pause => write!(f, "pause"),
            ThermalAction::Resume => write!(f, "resume"),
        }
    }
}

/// Snapshot of the monitor's latest sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalStatus {
    pub cpu_temp_estimate: f32,
    pub cpu_usage_estimate: f32,
    /// Blended pressure score in [0, 100].
    pub pressure: f32,
    pub throttling: bool,
    pub recommendation: ThermalAction,
}

impl Default for ThermalStatus {
    fn default() -> Self {
        Self {
            cpu_temp_estimate: TEMP_BASE,
            cpu_usage_estimate: 0.0,
            pressure: 0.0,
            throttling: false,
            recommendation: ThermalAction::Normal,
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalConfig {
    /// Disabled by default for stability.
    pub enabled: bool,
    pub sample_interval: Duration,
    /// Window after a throttling recommendation during which new throttling
    /// decisions are suppressed.
    pub cooldown: Duration,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_interval: Duration::from_secs(15),
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Computes a status from the 1-minute load average and core count.
///
/// Usage is the load average normalized by core count; temperature is a
/// linear model over usage; pressure blends the two equally.
pub fn compute_status(load_avg_1: f64, cores: usize) -> ThermalStatus {
    let cores = cores.max(1) as f64;
    let usage = ((load_avg_1 / cores) * 100.0).clamp(0.0, 100.0) as f32;
    let temp = TEMP_BASE + usage * 0.5;
    let norm_temp = (((temp - TEMP_BASE) / TEMP_RANGE) * 100.0).clamp(0.0, 100.0);
    let pressure = 0.5 * norm_temp + 0.5 * usage;

    ThermalStatus {
        cpu_temp_estimate: temp,
        cpu_usage_estimate: usage,
        pressure,
        throttling: pressure >= REDUCE_PRESSURE,
        recommendation: ThermalAction::Normal,
    }
}

/// Derives the next recommendation from pressure, applying stickiness.
///
/// New throttling decisions (pause, reduce) within the cooldown window after
/// the last non-normal recommendation keep the previous recommendation.
pub fn recommend(
    pressure: f32,
    previous: ThermalAction,
    since_last_non_normal: Option<Duration>,
    cooldown: Duration,
) -> ThermalAction {
    let raw = if pressure >= PAUSE_PRESSURE {
        ThermalAction::Pause
    } else if pressure >= REDUCE_PRESSURE {
        ThermalAction::ReduceConcurrency
    } else if pressure <= RESUME_PRESSURE {
        ThermalAction::Resume
    } else {
        ThermalAction::Normal
    };

    let is_throttling = matches!(raw, ThermalAction::Pause | ThermalAction::ReduceConcurrency);
    if is_throttling && raw != previous {
        if let Some(elapsed) = since_last_non_normal {
            if elapsed < cooldown {
                return previous;
            }
        }
    }

    raw
}

/// Background thermal sampler.
///
/// The latest status is always available via `current_status`; consumers
/// that want change notifications subscribe to the watch channel. The
/// channel only signals when the recommendation changes, while the borrowed
/// status always carries the freshest sample.
#[derive(Debug)]
pub struct ThermalMonitor {
    config: ThermalConfig,
    tx: watch::Sender<ThermalStatus>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThermalMonitor {
    pub fn new(config: ThermalConfig) -> Self {
        let (tx, _rx) = watch::channel(ThermalStatus::default());
        Self {
            config,
            tx,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ThermalConfig {
        &self.config
    }

    /// Latest sampled status (default status until the first sample).
    pub fn current_status(&self) -> ThermalStatus {
        self.tx.borrow().clone()
    }

    /// Subscribes to recommendation changes.
    pub fn subscribe(&self) -> watch::Receiver<ThermalStatus> {
        self.tx.subscribe()
    }

    /// Starts the sampling loop. No-op when disabled or already running.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let mut guard = match self.handle.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if guard.is_some() {
            return;
        }

        // The sampler holds a weak handle so a dropped monitor ends the loop.
        let weak = Arc::downgrade(self);
        let sample_interval = self.config.sample_interval;
        let cooldown = self.config.cooldown;
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(sample_interval);
            let mut previous = ThermalAction::Normal;
            let mut last_non_normal: Option<Instant> = None;

            loop {
                interval.tick().await;
                let Some(monitor) = weak.upgrade() else {
                    break;
                };

                let load_avg = sysinfo::System::load_average();
                let mut status = compute_status(load_avg.one, num_cpus::get());
                let now = Instant::now();
                status.recommendation = recommend(
                    status.pressure,
                    previous,
                    last_non_normal.map(|t| now.duration_since(t)),
                    cooldown,
                );

                let changed = status.recommendation != previous;
                if changed && status.recommendation != ThermalAction::Normal {
                    last_non_normal = Some(now);
                    tracing::info!(
                        "thermal recommendation changed to {} (pressure {:.1})",
                        status.recommendation,
                        status.pressure
                    );
                }
                previous = status.recommendation;

                monitor.tx.send_if_modified(|current| {
                    *current = status.clone();
                    changed
                });
            }
        }));
    }

    /// Stops the sampling loop.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for ThermalMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compute_status_idle() {
        let status = compute_status(0.0, 8);
        assert_eq!(status.cpu_usage_estimate, 0.0);
        assert_eq!(status.cpu_temp_estimate, TEMP_BASE);
        assert_eq!(status.pressure, 0.0);
        assert!(!status.throttling);
    }

    #[test]
    fn test_compute_status_saturated() {
        let status = compute_status(16.0, 8);
        assert_eq!(status.cpu_usage_estimate, 100.0);
        assert!(status.pressure > REDUCE_PRESSURE);
        assert!(status.throttling);
    }

    #[test]
    fn test_recommend_bands() {
        let cd = Duration::from_secs(10);
        assert_eq!(recommend(95.0, ThermalAction::Normal, None, cd), ThermalAction::Pause);
        assert_eq!(
            recommend(75.0, ThermalAction::Normal, None, cd),
            ThermalAction::ReduceConcurrency
        );
        assert_eq!(recommend(20.0, ThermalAction::Pause, None, cd), ThermalAction::Resume);
        assert_eq!(recommend(50.0, ThermalAction::Normal, None, cd), ThermalAction::Normal);
    }

    #[test]
    fn test_cooldown_suppresses_new_throttling() {
        let cd = Duration::from_secs(10);
        // Reduce was issued 2s ago; escalating to Pause is suppressed.
        let action = recommend(
            95.0,
            ThermalAction::ReduceConcurrency,
            Some(Duration::from_secs(2)),
            cd,
        );
        assert_eq!(action, ThermalAction::ReduceConcurrency);

        // After the cooldown elapses the escalation goes through.
        let action = recommend(
            95.0,
            ThermalAction::ReduceConcurrency,
            Some(Duration::from_secs(12)),
            cd,
        );
        assert_eq!(action, ThermalAction::Pause);
    }

    #[test]
    fn test_cooldown_does_not_block_resume() {
        let cd = Duration::from_secs(10);
        let action = recommend(10.0, ThermalAction::Pause, Some(Duration::from_secs(1)), cd);
        assert_eq!(action, ThermalAction::Resume);
    }

    #[test]
    fn test_repeated_recommendation_unaffected_by_cooldown() {
        let cd = Duration::from_secs(10);
        let action = recommend(95.0, ThermalAction::Pause, Some(Duration::from_secs(1)), cd);
        assert_eq!(action, ThermalAction::Pause);
    }

    #[tokio::test]
    async fn test_disabled_monitor_never_starts() {
        let monitor = Arc::new(ThermalMonitor::new(ThermalConfig::default()));
        monitor.start();
        assert!(monitor.handle.lock().expect("lock").is_none());
        assert_eq!(monitor.current_status().recommendation, ThermalAction::Normal);
    }

    #[tokio::test]
    async fn test_enabled_monitor_samples() {
        let monitor = Arc::new(ThermalMonitor::new(ThermalConfig {
            enabled: true,
            sample_interval: Duration::from_millis(10),
            cooldown: Duration::from_secs(10),
        }));
        monitor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The loop has sampled at least once; pressure is a real value.
        let status = monitor.current_status();
        assert!(status.pressure >= 0.0 && status.pressure <= 100.0);
        monitor.stop();
    }

    #[tokio::test]
    async fn test_subscribe_sees_current_value() {
        let monitor = Arc::new(ThermalMonitor::new(ThermalConfig::default()));
        let rx = monitor.subscribe();
        assert_eq!(rx.borrow().recommendation, ThermalAction::Normal);
        assert_eq!(rx.borrow().pressure, 0.0);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let monitor = Arc::new(ThermalMonitor::new(ThermalConfig {
            enabled: true,
            sample_interval: Duration::from_millis(50),
            cooldown: Duration::from_secs(10),
        }));
        monitor.start();
        monitor.start();
        assert!(monitor.handle.lock().expect("lock").is_some());
        monitor.stop();
        assert!(monitor.handle.lock().expect("lock").is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        // Pressure, usage, and temperature are always within their models'
        // bounds for any load average and core count.
        #[test]
        fn prop_compute_status_bounded(load in 0.0f64..1000.0, cores in 1usize..256) {
            let status = compute_status(load, cores);
            prop_assert!(status.cpu_usage_estimate >= 0.0 && status.cpu_usage_estimate <= 100.0);
            prop_assert!(status.pressure >= 0.0 && status.pressure <= 100.0);
            prop_assert!(status.cpu_temp_estimate >= TEMP_BASE);
            prop_assert!(status.cpu_temp_estimate <= TEMP_BASE + 50.0);
        }

        // The recommendation is always one of the four actions and is
        // deterministic for the same inputs.
        #[test]
        fn prop_recommend_deterministic(
            pressure in 0.0f32..100.0,
            prev in 0u8..4,
            elapsed_ms in proptest::option::of(0u64..30_000),
        ) {
            let previous = match prev {
                0 => ThermalAction::Normal,
                1 => ThermalAction::ReduceConcurrency,
                2 => ThermalAction::Pause,
                _ => ThermalAction::Resume,
            };
            let since = elapsed_ms.map(Duration::from_millis);
            let cooldown = Duration::from_secs(10);

            let first = recommend(pressure, previous, since, cooldown);
            let second = recommend(pressure, previous, since, cooldown);
            prop_assert_eq!(first, second);
        }
    }
}
