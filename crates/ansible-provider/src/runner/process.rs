// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ansible-runner child process management.
//!
//! [`RunnerProcess::start`] spawns the engine and hands it to a supervisor
//! task before returning, so cancellation and timeouts are handled the same
//! way no matter when they arrive. The supervisor stops a run in two stages:
//! SIGINT first, then SIGKILL if the process is still alive after the grace
//! period.
//!
//! In apply mode stdout and stderr go straight to the provider's own streams.
//! In check mode stdout is buffered for stats parsing and stderr is dropped,
//! since the provider's stdout may carry structured output of its own.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::traits::{Result, RunIdGenerator, RunOutcome, RunRequest, RunStatus, RunnerError, random_run_ids};
use crate::job_events::extract_failure_reason;

/// Default window between SIGINT and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Spawns ansible-runner for [`RunRequest`]s.
#[derive(Clone)]
pub struct RunnerProcess {
    binary: PathBuf,
    grace_period: Duration,
    run_ids: RunIdGenerator,
}

impl std::fmt::Debug for RunnerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerProcess")
            .field("binary", &self.binary)
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

impl RunnerProcess {
    /// Create a process launcher for `binary` with random run ids.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            grace_period: DEFAULT_GRACE_PERIOD,
            run_ids: random_run_ids(),
        }
    }

    /// Override the interrupt-to-kill window.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Use a custom run id source (e.g. a fixed sequence in tests).
    pub fn with_run_ids(mut self, run_ids: RunIdGenerator) -> Self {
        self.run_ids = run_ids;
        self
    }

    /// Engine executable.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Draw a fresh run id.
    pub fn next_run_id(&self) -> Uuid {
        (self.run_ids)()
    }

    /// Spawn a run. Must be called within a Tokio runtime.
    ///
    /// The returned handle already has its supervisor running; `cancel` is
    /// honoured from this point on.
    pub fn start(&self, request: RunRequest, cancel: CancellationToken) -> Result<RunHandle> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(request.args())
            .env_clear()
            .envs(layered_environment(std::env::vars_os(), &request.env))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if request.check_mode {
            cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::BinaryNotFound(self.binary.display().to_string())
            } else {
                RunnerError::StartFailed(e.to_string())
            }
        })?;

        let pid = child.id();
        info!(
            run_id = %request.run_id,
            pid = ?pid,
            check_mode = request.check_mode,
            working_dir = %request.working_dir.display(),
            "Started ansible-runner"
        );

        let stdout = child.stdout.take().map(StdoutReader::spawn);

        let (tx, rx) = oneshot::channel();
        let grace_period = self.grace_period;
        let timeout = request.timeout;
        let run_id = request.run_id;
        tokio::spawn(async move {
            let result = supervise(child, pid, cancel, timeout, grace_period, run_id).await;
            let _ = tx.send(result);
        });

        Ok(RunHandle {
            run_id,
            pid,
            job_events_dir: request.job_events_dir(),
            started: Instant::now(),
            grace_period,
            exit: rx,
            stdout,
        })
    }

    /// Start a run and wait for it.
    pub async fn run(&self, request: RunRequest, cancel: CancellationToken) -> Result<RunOutcome> {
        self.start(request, cancel)?.wait().await
    }
}

/// Layer environment variables: parent first, overrides win.
pub fn layered_environment<I>(
    parent: I,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = parent.into_iter().collect();
    for (key, value) in overrides {
        env.insert(OsString::from(key), OsString::from(value));
    }
    env
}

/// How the supervisor saw the process end.
#[derive(Debug)]
enum Termination {
    Exited(ExitStatus),
    Cancelled { forced: bool },
    TimedOut { forced: bool },
}

#[derive(Debug, Clone, Copy)]
enum StopReason {
    Cancelled,
    TimedOut,
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    grace_period: Duration,
    run_id: Uuid,
) -> std::io::Result<Termination> {
    let deadline = async {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let reason = tokio::select! {
        biased;

        status = child.wait() => return status.map(Termination::Exited),
        _ = cancel.cancelled() => StopReason::Cancelled,
        _ = &mut deadline => StopReason::TimedOut,
    };

    info!(run_id = %run_id, reason = ?reason, "Stopping ansible-runner");
    let forced = interrupt_then_kill(&mut child, pid, grace_period, run_id).await?;

    Ok(match reason {
        StopReason::Cancelled => Termination::Cancelled { forced },
        StopReason::TimedOut => Termination::TimedOut { forced },
    })
}

/// Send SIGINT, wait up to `grace_period`, then SIGKILL.
///
/// Returns whether the kill was needed.
async fn interrupt_then_kill(
    child: &mut Child,
    pid: Option<u32>,
    grace_period: Duration,
    run_id: Uuid,
) -> std::io::Result<bool> {
    if let Some(pid) = pid {
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            Ok(()) => debug!(run_id = %run_id, pid = pid, "Sent SIGINT"),
            Err(nix::errno::Errno::ESRCH) => {
                debug!(run_id = %run_id, pid = pid, "Process already exited (ESRCH)")
            }
            Err(e) => warn!(run_id = %run_id, pid = pid, error = %e, "Failed to send SIGINT"),
        }
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(status) => {
            status?;
            Ok(false)
        }
        Err(_) => {
            warn!(
                run_id = %run_id,
                grace_secs = grace_period.as_secs_f64(),
                "ansible-runner ignored SIGINT, killing"
            );
            child.kill().await?;
            Ok(true)
        }
    }
}

/// A started run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    pid: Option<u32>,
    job_events_dir: PathBuf,
    started: Instant,
    grace_period: Duration,
    exit: oneshot::Receiver<std::io::Result<Termination>>,
    stdout: Option<StdoutReader>,
}

/// Background reader for a check-mode stdout pipe.
///
/// Chunks are forwarded as they arrive so a drain that gives up still keeps
/// what was read.
#[derive(Debug)]
struct StdoutReader {
    chunks: mpsc::UnboundedReceiver<std::io::Result<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl StdoutReader {
    fn spawn(mut out: ChildStdout) -> Self {
        let (tx, chunks) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut chunk = vec![0u8; 8192];
            loop {
                match out.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(chunk[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });
        Self { chunks, task }
    }

    /// Collect output until EOF or until `limit` passes.
    ///
    /// Descendants of the engine can inherit the pipe and hold it open after
    /// the engine itself is gone; on expiry the reader is aborted and the
    /// bytes seen so far are returned.
    async fn collect(mut self, limit: Duration, run_id: Uuid) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let drained = tokio::time::timeout(limit, async {
            while let Some(chunk) = self.chunks.recv().await {
                buf.extend_from_slice(&chunk?);
            }
            Ok::<(), std::io::Error>(())
        })
        .await;

        match drained {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    run_id = %run_id,
                    bytes = buf.len(),
                    "stdout still open after ansible-runner exited, giving up"
                );
                self.task.abort();
            }
        }
        Ok(buf)
    }
}

impl RunHandle {
    /// Run identifier.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// OS process id, if still known at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the run to end and build its outcome.
    ///
    /// On a non-zero exit the job events are diagnosed. Diagnosis problems are
    /// logged and leave `failure_reason` empty; they never replace the exit
    /// status.
    pub async fn wait(self) -> Result<RunOutcome> {
        let termination = self
            .exit
            .await
            .map_err(|_| RunnerError::Other("run supervisor dropped".to_string()))??;

        let stdout = match self.stdout {
            Some(reader) => reader.collect(self.grace_period, self.run_id).await?,
            None => Vec::new(),
        };

        let (status, failure_reason) = match termination {
            Termination::Exited(exit) if exit.success() => (RunStatus::Succeeded, None),
            Termination::Exited(exit) => {
                let reason = diagnose_failure(&self.job_events_dir).await;
                (RunStatus::Failed { exit_code: exit.code() }, reason)
            }
            Termination::Cancelled { forced } => (RunStatus::Cancelled { forced }, None),
            Termination::TimedOut { forced } => (RunStatus::TimedOut { forced }, None),
        };

        let duration_ms = self.started.elapsed().as_millis() as u64;
        info!(
            run_id = %self.run_id,
            status = ?status,
            duration_ms = duration_ms,
            "ansible-runner finished"
        );

        Ok(RunOutcome {
            run_id: self.run_id,
            status,
            stdout,
            failure_reason,
            duration_ms,
        })
    }
}

async fn diagnose_failure(job_events_dir: &Path) -> Option<String> {
    match extract_failure_reason(job_events_dir).await {
        Ok(reason) if reason.is_empty() => None,
        Ok(reason) => Some(reason),
        Err(e) => {
            debug!(error = %e, "extracting ansible failure message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win() {
        let parent = vec![
            (OsString::from("PATH"), OsString::from("/usr/bin")),
            (OsString::from("ANSIBLE_INVENTORY"), OsString::from("parent")),
        ];
        let mut overrides = BTreeMap::new();
        overrides.insert("ANSIBLE_INVENTORY".to_string(), "/work/hosts".to_string());
        overrides.insert("EXTRA".to_string(), "1".to_string());

        let env = layered_environment(parent, &overrides);
        assert_eq!(env[&OsString::from("PATH")], OsString::from("/usr/bin"));
        assert_eq!(
            env[&OsString::from("ANSIBLE_INVENTORY")],
            OsString::from("/work/hosts")
        );
        assert_eq!(env[&OsString::from("EXTRA")], OsString::from("1"));
    }

    #[test]
    fn test_run_ids_injectable() {
        let fixed = Uuid::from_u128(42);
        let process = RunnerProcess::new("ansible-runner").with_run_ids(std::sync::Arc::new(move || fixed));
        assert_eq!(process.next_run_id(), fixed);
        assert_eq!(process.next_run_id(), fixed);
    }
}
