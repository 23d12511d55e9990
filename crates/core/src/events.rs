//! Lifecycle events emitted to the external sink.
//!
//! One event per occurrence: `Started` when a task is enqueued, throttled
//! `Progress` per task, periodic `BatchProgress` snapshots, and a terminal
//! `Complete` or `Error` per task.

use crate::errors::CompressionError;
use crate::progress::BatchSnapshot;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Event stream payload for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CompressionEvent {
    Started {
        file: String,
        preset: String,
        output_path: PathBuf,
    },
    Progress {
        file: String,
        preset: String,
        percent: f32,
        timemark: String,
    },
    BatchProgress(BatchSnapshot),
    Complete {
        file: String,
        preset: String,
        output_path: PathBuf,
        success: bool,
    },
    Error {
        file: String,
        preset: String,
        error: CompressionError,
    },
}

/// Sending half of the event stream, handed to `run_batch`.
pub type EventSink = mpsc::UnboundedSender<CompressionEvent>;

/// Creates the event channel for one batch.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<CompressionEvent>) {
    mpsc::unbounded_channel()
}
