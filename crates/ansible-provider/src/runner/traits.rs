// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner trait definitions.
//!
//! Defines the run request/outcome types and the interface the reconciler
//! drives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::job_events::job_events_dir;
use crate::policy::{PolicyError, RunPolicy};
use crate::stats::StatsError;

/// Dry-run flag forwarded to ansible-playbook through ansible-runner.
pub const CHECK_MODE_CMDLINE: &str = "\\--check";

/// Errors from runner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Engine executable was not found.
    #[error("Binary not found: {0}")]
    BinaryNotFound(String),

    /// Run parameters are unusable.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Process failed to start.
    #[error("Process start failed: {0}")]
    StartFailed(String),

    /// Run was cancelled before it finished.
    #[error("Execution cancelled")]
    Cancelled,

    /// Run exceeded its timeout.
    #[error("Execution timeout")]
    Timeout,

    /// Process exited unsuccessfully.
    #[error("{}", describe_failure(.exit_code, .reason))]
    Failed {
        /// Exit code, `None` if terminated by a signal.
        exit_code: Option<i32>,
        /// Diagnosed failure reason, if any.
        reason: Option<String>,
    },

    /// Run policy was rejected.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Check-mode output could not be parsed.
    #[error(transparent)]
    Stats(#[from] StatsError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

fn describe_failure(exit_code: &Option<i32>, reason: &Option<String>) -> String {
    let status = match exit_code {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    };
    match reason {
        Some(reason) => format!("{}: {}", status, reason),
        None => status,
    }
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Source of fresh run identifiers.
pub type RunIdGenerator = Arc<dyn Fn() -> Uuid + Send + Sync>;

/// Generator producing random v4 UUIDs.
pub fn random_run_ids() -> RunIdGenerator {
    Arc::new(Uuid::new_v4)
}

/// What ansible-runner executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunContent {
    /// A playbook file under `target`.
    Playbook {
        /// Private data dir passed to `run`.
        target: PathBuf,
        /// Playbook file name, relative to the project dir.
        playbook: String,
    },
    /// A single role resolved under `roles_path`.
    Role {
        /// Role name.
        name: String,
        /// Directory containing the role.
        roles_path: PathBuf,
    },
}

/// One execution of the engine. Built fresh for every run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Per-object working directory (ansible-runner private data dir).
    pub working_dir: PathBuf,
    /// Playbook or role to run.
    pub content: RunContent,
    /// Environment overrides, applied over the parent environment.
    pub env: BTreeMap<String, String>,
    /// Dry-run instead of apply.
    pub check_mode: bool,
    /// Artifact directories the engine keeps (`--rotate-artifacts`).
    pub artifacts_history_limit: u32,
    /// Unique id namespacing this run's artifacts (`--ident`).
    pub run_id: Uuid,
    /// Upper bound on the run, if any.
    pub timeout: Option<Duration>,
}

impl RunRequest {
    /// Build the ansible-runner argument vector.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string()];

        match &self.content {
            RunContent::Playbook { target, playbook } => {
                args.push(target.display().to_string());
                args.push("-p".to_string());
                args.push(playbook.clone());
            }
            RunContent::Role { name, roles_path } => {
                let working_dir = self.working_dir.display().to_string();
                args.push(working_dir.clone());
                args.push("--role".to_string());
                args.push(name.clone());
                args.push("--roles-path".to_string());
                args.push(roles_path.display().to_string());
                args.push("--project-dir".to_string());
                args.push(working_dir);
            }
        }

        if self.check_mode {
            args.push("--cmdline".to_string());
            args.push(CHECK_MODE_CMDLINE.to_string());
        }

        args.push("--rotate-artifacts".to_string());
        args.push(self.artifacts_history_limit.to_string());
        args.push("--ident".to_string());
        args.push(self.run_id.to_string());

        args
    }

    /// Where this run's job events land.
    pub fn job_events_dir(&self) -> PathBuf {
        job_events_dir(&self.working_dir, &self.run_id.to_string())
    }

    /// Get the working directory.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Exit status zero.
    Succeeded,
    /// Non-zero exit or killed by a signal nobody asked for.
    Failed {
        /// Exit code, `None` if terminated by a signal.
        exit_code: Option<i32>,
    },
    /// Stopped on request. `forced` if it ignored the interrupt.
    Cancelled {
        /// Whether the process had to be killed.
        forced: bool,
    },
    /// Stopped after exceeding its timeout.
    TimedOut {
        /// Whether the process had to be killed.
        forced: bool,
    },
}

/// Result of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Run identifier.
    pub run_id: Uuid,
    /// How the run ended.
    pub status: RunStatus,
    /// Buffered stdout (check mode only; empty otherwise).
    pub stdout: Vec<u8>,
    /// Diagnosed failure reason, if the run failed and events explained why.
    pub failure_reason: Option<String>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
}

impl RunOutcome {
    /// Outcome of a successful run.
    pub fn succeeded(run_id: Uuid, stdout: Vec<u8>) -> Self {
        Self {
            run_id,
            status: RunStatus::Succeeded,
            stdout,
            failure_reason: None,
            duration_ms: 0,
        }
    }

    /// Whether the run succeeded.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Convert into the buffered stdout, or the error describing the failure.
    pub fn into_result(self) -> Result<Vec<u8>> {
        match self.status {
            RunStatus::Succeeded => Ok(self.stdout),
            RunStatus::Failed { exit_code } => Err(RunnerError::Failed {
                exit_code,
                reason: self.failure_reason,
            }),
            RunStatus::Cancelled { .. } => Err(RunnerError::Cancelled),
            RunStatus::TimedOut { .. } => Err(RunnerError::Timeout),
        }
    }
}

/// State marker written into the extra vars before a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// The managed resource should exist.
    Present,
    /// The managed resource should be removed.
    Absent,
}

impl ResourceState {
    /// Value written under `state`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Present => "present",
            ResourceState::Absent => "absent",
        }
    }
}

/// Interface the reconciler drives for one managed object.
///
/// Implementations are bound to one object's working directory. They do not
/// touch the object itself; condition and annotation updates belong to the
/// caller.
#[async_trait]
pub trait AnsibleRunner: Send + Sync {
    /// Run policy parsed from the object's annotations.
    fn run_policy(&self) -> RunPolicy;

    /// Switch subsequent runs between check and apply mode.
    fn enable_check_mode(&self, enabled: bool);

    /// Merge the state marker for `object_name` into `env/extravars`.
    async fn write_extra_var(&self, object_name: &str, state: ResourceState) -> Result<()>;

    /// Execute the engine once and wait for it.
    ///
    /// Returns `Ok` for any run that started, including failed ones; inspect
    /// [`RunOutcome::status`] or call [`RunOutcome::into_result`].
    async fn run(&self, cancel: &CancellationToken) -> Result<RunOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content: RunContent, check_mode: bool) -> RunRequest {
        RunRequest {
            working_dir: PathBuf::from("/work/obj"),
            content,
            env: BTreeMap::new(),
            check_mode,
            artifacts_history_limit: 10,
            run_id: Uuid::nil(),
            timeout: None,
        }
    }

    fn playbook() -> RunContent {
        RunContent::Playbook {
            target: PathBuf::from("/work/obj"),
            playbook: "playbook.yml".to_string(),
        }
    }

    #[test]
    fn test_playbook_args_apply_mode() {
        let args = request(playbook(), false).args();
        assert_eq!(
            args,
            vec![
                "run",
                "/work/obj",
                "-p",
                "playbook.yml",
                "--rotate-artifacts",
                "10",
                "--ident",
                "00000000-0000-0000-0000-000000000000",
            ]
        );
    }

    #[test]
    fn test_playbook_args_check_mode() {
        let args = request(playbook(), true).args();
        let pos = args.iter().position(|a| a == "--cmdline").unwrap();
        assert_eq!(args[pos + 1], "\\--check");
        assert!(args.contains(&"--rotate-artifacts".to_string()));
        assert!(args.contains(&"--ident".to_string()));
    }

    #[test]
    fn test_role_args() {
        let content = RunContent::Role {
            name: "web".to_string(),
            roles_path: PathBuf::from("/etc/ansible/roles"),
        };
        let args = request(content, false).args();
        assert_eq!(
            &args[..8],
            &[
                "run",
                "/work/obj",
                "--role",
                "web",
                "--roles-path",
                "/etc/ansible/roles",
                "--project-dir",
                "/work/obj",
            ]
        );
    }

    #[test]
    fn test_failed_display() {
        let err = RunnerError::Failed {
            exit_code: Some(2),
            reason: Some("Failed on play \"p\"".to_string()),
        };
        assert_eq!(err.to_string(), "exit status 2: Failed on play \"p\"");

        let err = RunnerError::Failed {
            exit_code: Some(1),
            reason: None,
        };
        assert_eq!(err.to_string(), "exit status 1");

        let err = RunnerError::Failed {
            exit_code: None,
            reason: None,
        };
        assert_eq!(err.to_string(), "terminated by signal");
    }

    #[test]
    fn test_outcome_into_result() {
        let id = Uuid::new_v4();
        assert_eq!(
            RunOutcome::succeeded(id, b"out".to_vec()).into_result().unwrap(),
            b"out"
        );

        let outcome = RunOutcome {
            status: RunStatus::Cancelled { forced: false },
            ..RunOutcome::succeeded(id, Vec::new())
        };
        assert!(matches!(outcome.into_result(), Err(RunnerError::Cancelled)));

        let outcome = RunOutcome {
            status: RunStatus::Failed { exit_code: Some(2) },
            failure_reason: Some("boom".to_string()),
            ..RunOutcome::succeeded(id, Vec::new())
        };
        assert!(matches!(
            outcome.into_result(),
            Err(RunnerError::Failed { exit_code: Some(2), reason: Some(ref r) }) if r == "boom"
        ));
    }

    #[test]
    fn test_job_events_dir() {
        let req = request(playbook(), false);
        assert_eq!(
            req.job_events_dir(),
            PathBuf::from("/work/obj/artifacts/00000000-0000-0000-0000-000000000000/job_events")
        );
    }
}
