// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job event reading and failure diagnosis.
//!
//! ansible-runner writes one JSON file per event into
//! `{working_dir}/artifacts/{run_id}/job_events/`. When a run exits non-zero,
//! the runner reads that directory back and condenses the failed and
//! unreachable events into a single human-readable reason.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Event tag emitted when a task fails on a host.
pub const EVENT_RUNNER_ON_FAILED: &str = "runner_on_failed";

/// Event tag emitted when a host cannot be reached.
pub const EVENT_RUNNER_ON_UNREACHABLE: &str = "runner_on_unreachable";

/// Errors from reading or interpreting job events.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiagnosisError {
    /// The job events directory could not be listed.
    #[error("reading job events directory {}: {source}", path.display())]
    ReadDir {
        /// Directory that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A failure event carried event data of the wrong shape.
    #[error("unmarshaling job event {uuid} as runner event: {source}")]
    EventData {
        /// UUID of the offending event.
        uuid: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// One structured record from a run's `job_events` directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Unique id of the event.
    pub uuid: String,
    /// Event type tag (e.g. `runner_on_failed`).
    pub event: String,
    /// Display output the engine produced for this event.
    #[serde(default)]
    pub stdout: String,
    /// Opaque, event-specific payload.
    #[serde(default)]
    pub event_data: Map<String, Value>,
}

/// The subset of `event_data` carried by runner failure events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RunnerEventData {
    /// Play name.
    #[serde(default)]
    pub play: String,
    /// Task name.
    #[serde(default)]
    pub task: String,
    /// Host the task ran against.
    #[serde(default)]
    pub host: String,
    /// Module result.
    #[serde(default, rename = "res")]
    pub result: RunnerResult,
    /// Whether the task was marked `ignore_errors`.
    #[serde(default)]
    pub ignore_errors: bool,
}

/// Module result carried by a runner event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RunnerResult {
    /// Result message.
    #[serde(default)]
    pub msg: String,
}

/// Kind of failure an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A task failed.
    Failed,
    /// A host was unreachable.
    Unreachable,
}

impl FailureKind {
    /// Classify an event tag; `None` for anything that is not a failure.
    pub fn from_event(event: &str) -> Option<Self> {
        match event {
            EVENT_RUNNER_ON_FAILED => Some(FailureKind::Failed),
            EVENT_RUNNER_ON_UNREACHABLE => Some(FailureKind::Unreachable),
            _ => None,
        }
    }

    /// Label used at the start of a diagnosis line.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Failed => "Failed",
            FailureKind::Unreachable => "Unreachable",
        }
    }
}

/// Get the job events directory for a run.
pub fn job_events_dir(working_dir: &Path, run_id: &str) -> PathBuf {
    working_dir
        .join("artifacts")
        .join(run_id)
        .join("job_events")
}

/// Read every event file in `dir`.
///
/// Files that cannot be read or parsed are skipped and logged at debug level.
/// Only a missing or unlistable directory is an error. Entries are visited in
/// file-name order, which is not guaranteed to be execution order.
pub async fn parse_events(dir: &Path) -> Result<Vec<JobEvent>, DiagnosisError> {
    let read_dir_err = |source| DiagnosisError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_dir_err)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
        paths.push(entry.path());
    }
    paths.sort();

    let mut events = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable job event file");
                continue;
            }
        };

        match serde_json::from_slice::<JobEvent>(&bytes) {
            Ok(event) => events.push(event),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unparseable job event file");
            }
        }
    }

    Ok(events)
}

/// Condense failure events into a single reason.
///
/// Only `runner_on_failed` and `runner_on_unreachable` events contribute, and
/// events flagged `ignore_errors` are dropped. Lines are joined with `"; "`.
/// No matching events yields an empty string.
pub fn diagnose(events: &[JobEvent]) -> Result<String, DiagnosisError> {
    let mut messages = Vec::new();

    for event in events {
        let Some(kind) = FailureKind::from_event(&event.event) else {
            continue;
        };

        let data: RunnerEventData =
            serde_json::from_value(Value::Object(event.event_data.clone())).map_err(|source| {
                DiagnosisError::EventData {
                    uuid: event.uuid.clone(),
                    source,
                }
            })?;

        if data.ignore_errors {
            continue;
        }

        messages.push(format!(
            "{} on play {:?}, task {:?}, host {:?}: {}",
            kind.label(),
            data.play,
            data.task,
            data.host,
            data.result.msg
        ));
    }

    Ok(messages.join("; "))
}

/// Read a job events directory and diagnose it in one step.
pub async fn extract_failure_reason(dir: &Path) -> Result<String, DiagnosisError> {
    let events = parse_events(dir).await?;
    diagnose(&events)
}
