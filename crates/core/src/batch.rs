//! Batch orchestration.
//!
//! `Compressor` is the explicitly constructed composition root: it owns the
//! preset registry, the process registry, and the thermal monitor, and
//! drives one batch at a time through the scheduler. Only the initial
//! output-directory validation aborts a batch; every other failure is
//! captured into the task table and the result list.

use crate::errors::{CompressionError, ErrorKind, ErrorSummary};
use crate::events::{CompressionEvent, EventSink};
use crate::presets::{Preset, PresetRegistry};
use crate::process_registry::ProcessRegistry;
use crate::progress::{new_shared_aggregator, SharedAggregator, SmoothingPolicy};
use crate::scheduler;
use crate::strategy::{CompressionResult, Strategy, StrategyContext};
use crate::tasks::{expand_tasks, CompressionTask, PresetConfig, TaskKey, TaskStatus};
use crate::thermal::{ThermalConfig, ThermalMonitor};
use crate::validate::{self, AdvancedSettings};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use vidpress_config::Config;

/// Tunables owned by the orchestrator across batches.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressorOptions {
    /// Standing concurrency override; a per-batch advanced override wins.
    pub max_concurrent: Option<usize>,
    pub smoothing: SmoothingPolicy,
    pub thermal: ThermalConfig,
    /// Interval of the batch-progress snapshot recomputation.
    pub batch_tick: std::time::Duration,
}

impl Default for CompressorOptions {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            smoothing: SmoothingPolicy::default(),
            thermal: ThermalConfig::default(),
            batch_tick: std::time::Duration::from_secs(1),
        }
    }
}

impl CompressorOptions {
    /// Maps the loaded configuration onto orchestrator options.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent: (config.concurrency.max_concurrent > 0)
                .then_some(config.concurrency.max_concurrent as usize),
            smoothing: SmoothingPolicy::default(),
            thermal: ThermalConfig {
                enabled: config.thermal.enabled,
                sample_interval: std::time::Duration::from_secs(config.thermal.sample_interval_secs),
                cooldown: std::time::Duration::from_secs(config.thermal.cooldown_secs),
            },
            batch_tick: std::time::Duration::from_secs(1),
        }
    }
}

/// One batch submission.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub files: Vec<PathBuf>,
    pub preset_configs: Vec<PresetConfig>,
    pub output_directory: PathBuf,
    /// Optional per-file custom output names.
    pub output_names: HashMap<PathBuf, String>,
    pub advanced: Option<AdvancedSettings>,
}

/// The compression orchestrator.
pub struct Compressor {
    presets: PresetRegistry,
    processes: Arc<ProcessRegistry>,
    thermal: Arc<ThermalMonitor>,
    options: CompressorOptions,
    cancel_flag: Arc<AtomicBool>,
}

impl Compressor {
    pub fn new(options: CompressorOptions) -> Self {
        Self::with_presets(PresetRegistry::new(), options)
    }

    pub fn with_presets(presets: PresetRegistry, options: CompressorOptions) -> Self {
        let thermal = Arc::new(ThermalMonitor::new(options.thermal.clone()));
        Self {
            presets,
            processes: Arc::new(ProcessRegistry::new()),
            thermal,
            options,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    pub fn presets_mut(&mut self) -> &mut PresetRegistry {
        &mut self.presets
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    pub fn thermal(&self) -> &Arc<ThermalMonitor> {
        &self.thermal
    }

    /// Cancels the running batch: every live transcode is signalled for a
    /// force-kill and not-yet-started tasks terminate as cancelled.
    pub fn cancel_all(&self) -> usize {
        self.cancel_flag.store(true, Ordering::SeqCst);
        let signalled = self.processes.cancel_all();
        tracing::info!("cancellation requested; {} live transcodes signalled", signalled);
        signalled
    }

    /// Runs one batch to completion or cancellation.
    ///
    /// Returns one `CompressionResult` per task, in expansion order. The
    /// only early abort is output-directory validation; per-task failures
    /// are captured into the result list and the batch continues.
    pub async fn run_batch(
        &self,
        request: BatchRequest,
        sink: EventSink,
    ) -> Result<Vec<CompressionResult>, CompressionError> {
        let batch_id = Uuid::new_v4();
        tracing::info!(
            "batch {} starting: {} file(s), {} preset config(s)",
            batch_id,
            request.files.len(),
            request.preset_configs.len()
        );

        validate::validate_output_dir(&request.output_directory).await?;
        self.cancel_flag.store(false, Ordering::SeqCst);

        let tasks = expand_tasks(
            &request.files,
            &request.preset_configs,
            &request.output_directory,
            &request.output_names,
            &self.presets,
        );

        // Observers see the full task list before any transcoding begins.
        for task in &tasks {
            let _ = sink.send(CompressionEvent::Started {
                file: task.file_name.clone(),
                preset: task.preset_id.clone(),
                output_path: task.output_path.clone(),
            });
        }

        if tasks.is_empty() {
            tracing::info!("batch {} had no runnable tasks", batch_id);
            return Ok(Vec::new());
        }

        let keys: Vec<TaskKey> = tasks.iter().map(|t| t.key.clone()).collect();
        let aggregator = new_shared_aggregator(self.options.smoothing.clone());
        if let Ok(mut agg) = aggregator.lock() {
            agg.seed(tasks.clone());
        }

        // Out-of-range overrides fail every task before a subprocess exists.
        if let Some(advanced) = request.advanced.as_ref() {
            if let Err(error) = validate::validate_advanced(advanced) {
                return Ok(self.fail_whole_batch(&tasks, &aggregator, &sink, error));
            }
        }

        self.thermal.start();

        let tick = spawn_snapshot_tick(
            aggregator.clone(),
            sink.clone(),
            self.options.batch_tick,
        );

        let bound = request
            .advanced
            .as_ref()
            .and_then(|a| a.max_concurrent)
            .or(self.options.max_concurrent)
            .unwrap_or_else(scheduler::default_concurrency);

        let mut work: HashMap<TaskKey, (CompressionTask, Preset)> = tasks
            .into_iter()
            .filter_map(|task| {
                let preset = self.presets.get(&task.preset_id)?.clone();
                Some((task.key.clone(), (task, preset)))
            })
            .collect();

        let results: Arc<Mutex<HashMap<TaskKey, CompressionResult>>> =
            Arc::new(Mutex::new(HashMap::new()));

        {
            let advanced = request.advanced.clone();
            let output_directory = request.output_directory.clone();
            let processes = self.processes.clone();
            let aggregator = aggregator.clone();
            let sink = sink.clone();
            let results = results.clone();
            let cancel_flag = self.cancel_flag.clone();

            scheduler::drive(
                keys.clone(),
                bound,
                &self.thermal,
                &self.cancel_flag,
                move |key| {
                    let entry = work.remove(&key);
                    let advanced = advanced.clone();
                    let output_directory = output_directory.clone();
                    let processes = processes.clone();
                    let aggregator = aggregator.clone();
                    let sink = sink.clone();
                    let results = results.clone();
                    let cancel_flag = cancel_flag.clone();
                    async move {
                        let Some((task, preset)) = entry else {
                            return;
                        };
                        run_one(
                            task,
                            preset,
                            advanced,
                            output_directory,
                            processes,
                            aggregator,
                            sink,
                            results,
                            cancel_flag,
                        )
                        .await;
                    }
                },
            )
            .await;
        }

        tick.abort();
        let _ = tick.await;
        if let Ok(agg) = aggregator.lock() {
            let _ = sink.send(CompressionEvent::BatchProgress(agg.snapshot()));
        }

        let ordered = collect_ordered_results(&keys, &results);

        let failures: Vec<CompressionError> = ordered
            .iter()
            .filter_map(|r| r.error.clone())
            .filter(|e| e.kind != ErrorKind::Cancellation)
            .collect();
        if !failures.is_empty() {
            let summary = ErrorSummary::from_errors(&failures);
            tracing::warn!(
                "batch {} finished with {} failure(s) ({} recoverable): {:?}",
                batch_id,
                summary.total,
                summary.recoverable,
                summary.suggestions
            );
        } else {
            tracing::info!("batch {} finished", batch_id);
        }

        Ok(ordered)
    }

    /// Terminates every task with the same validation error.
    fn fail_whole_batch(
        &self,
        tasks: &[CompressionTask],
        aggregator: &SharedAggregator,
        sink: &EventSink,
        error: CompressionError,
    ) -> Vec<CompressionResult> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            if let Ok(mut agg) = aggregator.lock() {
                agg.mark_terminal(&task.key, TaskStatus::Failed, Some(&error));
            }
            let _ = sink.send(CompressionEvent::Error {
                file: task.file_name.clone(),
                preset: task.preset_id.clone(),
                error: error.clone(),
            });
            results.push(CompressionResult {
                file: task.key.file.clone(),
                preset: task.preset_id.clone(),
                output_path: None,
                success: false,
                error: Some(error.clone()),
            });
        }
        if let Ok(agg) = aggregator.lock() {
            let _ = sink.send(CompressionEvent::BatchProgress(agg.snapshot()));
        }
        results
    }
}

/// Emits a batch snapshot on a fixed interval, independent of task events.
fn spawn_snapshot_tick(
    aggregator: SharedAggregator,
    sink: EventSink,
    period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshot = aggregator.lock().ok().map(|agg| agg.snapshot());
            match snapshot {
                Some(snapshot) => {
                    if sink.send(CompressionEvent::BatchProgress(snapshot)).is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    })
}

/// Executes one task end to end and records its result.
#[allow(clippy::too_many_arguments)]
async fn run_one(
    task: CompressionTask,
    preset: Preset,
    advanced: Option<AdvancedSettings>,
    output_directory: PathBuf,
    processes: Arc<ProcessRegistry>,
    aggregator: SharedAggregator,
    sink: EventSink,
    results: Arc<Mutex<HashMap<TaskKey, CompressionResult>>>,
    cancel_flag: Arc<AtomicBool>,
) {
    let key = task.key.clone();

    if cancel_flag.load(Ordering::SeqCst) {
        if let Ok(mut agg) = aggregator.lock() {
            agg.mark_terminal(&key, TaskStatus::Cancelled, None);
        }
        let _ = sink.send(CompressionEvent::Complete {
            file: task.file_name.clone(),
            preset: task.preset_id.clone(),
            output_path: task.output_path.clone(),
            success: false,
        });
        record(
            &results,
            key.clone(),
            CompressionResult {
                file: key.file.clone(),
                preset: task.preset_id.clone(),
                output_path: None,
                success: false,
                error: Some(CompressionError::cancelled()),
            },
        );
        return;
    }

    let strategy = Strategy::select(advanced.as_ref());
    tracing::debug!("task {} running {} strategy", key, strategy.name());

    let ctx = StrategyContext {
        task: &task,
        preset: &preset,
        advanced: advanced.as_ref(),
        output_directory: &output_directory,
        processes: &processes,
        aggregator: &aggregator,
        sink: &sink,
    };

    match strategy.execute(&ctx).await {
        Ok(result) => {
            if let Ok(mut agg) = aggregator.lock() {
                agg.mark_terminal(&key, TaskStatus::Completed, None);
            }
            let _ = sink.send(CompressionEvent::Complete {
                file: task.file_name.clone(),
                preset: task.preset_id.clone(),
                output_path: task.output_path.clone(),
                success: true,
            });
            record(&results, key, result);
        }
        Err(error) if error.is_cancellation() => {
            if let Ok(mut agg) = aggregator.lock() {
                agg.mark_terminal(&key, TaskStatus::Cancelled, None);
            }
            let _ = sink.send(CompressionEvent::Complete {
                file: task.file_name.clone(),
                preset: task.preset_id.clone(),
                output_path: task.output_path.clone(),
                success: false,
            });
            record(
                &results,
                key.clone(),
                CompressionResult {
                    file: key.file.clone(),
                    preset: task.preset_id.clone(),
                    output_path: None,
                    success: false,
                    error: Some(error),
                },
            );
        }
        Err(error) => {
            if let Ok(mut agg) = aggregator.lock() {
                agg.mark_terminal(&key, TaskStatus::Failed, Some(&error));
            }
            let _ = sink.send(CompressionEvent::Error {
                file: task.file_name.clone(),
                preset: task.preset_id.clone(),
                error: error.clone(),
            });
            record(
                &results,
                key.clone(),
                CompressionResult {
                    file: key.file.clone(),
                    preset: task.preset_id.clone(),
                    output_path: None,
                    success: false,
                    error: Some(error),
                },
            );
        }
    }
}

fn record(
    results: &Mutex<HashMap<TaskKey, CompressionResult>>,
    key: TaskKey,
    result: CompressionResult,
) {
    if let Ok(mut map) = results.lock() {
        map.insert(key, result);
    }
}

/// Assembles the result list in task expansion order.
fn collect_ordered_results(
    keys: &[TaskKey],
    results: &Mutex<HashMap<TaskKey, CompressionResult>>,
) -> Vec<CompressionResult> {
    let mut map = match results.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(_) => HashMap::new(),
    };
    keys.iter()
        .map(|key| {
            map.remove(key).unwrap_or_else(|| CompressionResult {
                file: key.file.clone(),
                preset: key.preset_id.clone(),
                output_path: None,
                success: false,
                error: Some(CompressionError::unknown("task produced no result")),
            })
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use vidpress_config::{ConcurrencyConfig, OutputConfig, ThermalSection};

    fn request_for(files: Vec<PathBuf>, output: PathBuf) -> BatchRequest {
        BatchRequest {
            files,
            preset_configs: vec![PresetConfig::new("web-standard", true)],
            output_directory: output,
            output_names: HashMap::new(),
            advanced: None,
        }
    }

    async fn drain(
        mut rx: tokio::sync::mpsc::UnboundedReceiver<CompressionEvent>,
    ) -> Vec<CompressionEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_options_from_config() {
        let config = Config {
            concurrency: ConcurrencyConfig { max_concurrent: 3 },
            thermal: ThermalSection {
                enabled: true,
                sample_interval_secs: 20,
                cooldown_secs: 5,
            },
            output: OutputConfig { directory: None },
        };
        let options = CompressorOptions::from_config(&config);

        assert_eq!(options.max_concurrent, Some(3));
        assert!(options.thermal.enabled);
        assert_eq!(options.thermal.sample_interval, std::time::Duration::from_secs(20));
        assert_eq!(options.thermal.cooldown, std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_options_from_config_auto_concurrency() {
        let options = CompressorOptions::from_config(&Config::default());
        assert_eq!(options.max_concurrent, None);
        assert!(!options.thermal.enabled);
    }

    #[tokio::test]
    async fn test_unknown_preset_batch_completes_empty() {
        let compressor = Compressor::new(CompressorOptions::default());
        let dir = tempfile::tempdir().expect("tempdir");
        let (sink, rx) = event_channel();

        let request = BatchRequest {
            files: vec![PathBuf::from("/v/a.mp4")],
            preset_configs: vec![PresetConfig::new("does-not-exist", true)],
            output_directory: dir.path().to_path_buf(),
            output_names: HashMap::new(),
            advanced: None,
        };

        let results = compressor
            .run_batch(request, sink)
            .await
            .expect("batch should not abort");

        assert!(results.is_empty());
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_inputs_fail_per_task_without_aborting() {
        let compressor = Compressor::new(CompressorOptions::default());
        let dir = tempfile::tempdir().expect("tempdir");
        let (sink, rx) = event_channel();

        let request = request_for(
            vec![PathBuf::from("/no/a.mp4"), PathBuf::from("/no/b.mp4")],
            dir.path().to_path_buf(),
        );

        let results = compressor
            .run_batch(request, sink)
            .await
            .expect("batch should not abort");

        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(!result.success);
            assert_eq!(
                result.error.as_ref().map(|e| e.kind),
                Some(ErrorKind::Validation)
            );
        }
        assert!(compressor.processes().is_empty());

        let events = drain(rx).await;
        let started = events
            .iter()
            .filter(|e| matches!(e, CompressionEvent::Started { .. }))
            .count();
        let errors = events
            .iter()
            .filter(|e| matches!(e, CompressionEvent::Error { .. }))
            .count();
        assert_eq!(started, 2);
        assert_eq!(errors, 2);
    }

    #[tokio::test]
    async fn test_out_of_range_crf_fails_every_task_before_spawn() {
        let compressor = Compressor::new(CompressorOptions::default());
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.mp4");
        tokio::fs::write(&input, b"data").await.expect("write");
        let (sink, rx) = event_channel();

        let mut request = request_for(vec![input.clone(), input.clone()], dir.path().to_path_buf());
        // Same file listed twice collapses to one task; add a second file.
        let second = dir.path().join("other.mp4");
        tokio::fs::write(&second, b"data").await.expect("write");
        request.files = vec![input, second];
        request.advanced = Some(AdvancedSettings {
            crf: Some(60),
            ..Default::default()
        });

        let results = compressor
            .run_batch(request, sink)
            .await
            .expect("batch should not abort");

        assert_eq!(results.len(), 2);
        for result in &results {
            let error = result.error.as_ref().expect("validation error");
            assert_eq!(error.kind, ErrorKind::Validation);
            assert!(error.message.contains("quality factor"));
        }
        assert!(compressor.processes().is_empty());

        let events = drain(rx).await;
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, CompressionEvent::Error { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_output_dir_failure_aborts_batch() {
        let compressor = Compressor::new(CompressorOptions::default());
        let dir = tempfile::tempdir().expect("tempdir");
        let blocked = dir.path().join("file-not-dir");
        tokio::fs::write(&blocked, b"x").await.expect("write");
        let (sink, _rx) = event_channel();

        let request = request_for(vec![PathBuf::from("/v/a.mp4")], blocked);
        let result = compressor.run_batch(request, sink).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancel_all_is_safe_when_idle() {
        let compressor = Compressor::new(CompressorOptions::default());
        assert_eq!(compressor.cancel_all(), 0);
        assert_eq!(compressor.cancel_all(), 0);
        assert!(compressor.processes().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_flag_terminates_pending_tasks() {
        let compressor = Compressor::new(CompressorOptions::default());
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.mp4");
        tokio::fs::write(&input, b"data").await.expect("write");
        let (sink, rx) = event_channel();

        // A cancel issued before the driver reaches a task marks it
        // cancelled without spawning anything. Setting the flag through
        // the registry path mid-batch is exercised at the registry level;
        // here the per-task short-circuit is driven directly.
        let task = CompressionTask::new(
            TaskKey::new(input.clone(), "web-standard"),
            true,
            dir.path().join("out.mp4"),
        );
        let preset = compressor.presets().get("web-standard").expect("builtin").clone();
        let aggregator = new_shared_aggregator(SmoothingPolicy::default());
        if let Ok(mut agg) = aggregator.lock() {
            agg.seed(vec![task.clone()]);
        }
        let results = Arc::new(Mutex::new(HashMap::new()));
        let cancel_flag = Arc::new(AtomicBool::new(true));

        run_one(
            task.clone(),
            preset,
            None,
            dir.path().to_path_buf(),
            Arc::new(ProcessRegistry::new()),
            aggregator.clone(),
            sink.clone(),
            results.clone(),
            cancel_flag,
        )
        .await;
        drop(sink);

        let status = aggregator
            .lock()
            .ok()
            .and_then(|agg| agg.task(&task.key).map(|t| t.status));
        assert_eq!(status, Some(TaskStatus::Cancelled));

        let recorded = results.lock().expect("lock").get(&task.key).cloned();
        assert_eq!(
            recorded.and_then(|r| r.error).map(|e| e.kind),
            Some(ErrorKind::Cancellation)
        );

        let events = drain(rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            CompressionEvent::Complete { success: false, .. }
        )));
    }
}
