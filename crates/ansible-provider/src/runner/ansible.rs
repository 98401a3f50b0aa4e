// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ansible-runner backed [`AnsibleRunner`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::extravars::write_extra_var;
use super::process::RunnerProcess;
use super::traits::{AnsibleRunner, ResourceState, Result, RunContent, RunOutcome, RunRequest};
use crate::policy::RunPolicy;

/// Runs one managed object's content through ansible-runner.
///
/// Built by [`Parameters::init`](super::params::Parameters::init).
#[derive(Debug)]
pub struct PlaybookRunner {
    process: RunnerProcess,
    working_dir: PathBuf,
    content: RunContent,
    env: BTreeMap<String, String>,
    policy: RunPolicy,
    check_mode: AtomicBool,
    artifacts_history_limit: u32,
    timeout: Option<Duration>,
}

impl PlaybookRunner {
    /// Create a runner for prepared content.
    pub fn new(
        process: RunnerProcess,
        working_dir: PathBuf,
        content: RunContent,
        env: BTreeMap<String, String>,
        policy: RunPolicy,
        artifacts_history_limit: u32,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            process,
            working_dir,
            content,
            env,
            policy,
            check_mode: AtomicBool::new(false),
            artifacts_history_limit,
            timeout,
        }
    }

    /// Working directory of the object.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Content selection.
    pub fn content(&self) -> &RunContent {
        &self.content
    }

    /// Environment overrides passed to every run.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Parsed run policy.
    pub fn policy(&self) -> RunPolicy {
        self.policy
    }

    /// Whether the next run is a dry run.
    pub fn check_mode(&self) -> bool {
        self.check_mode.load(Ordering::SeqCst)
    }

    /// Build the request for the next run with a fresh run id.
    pub fn request(&self) -> RunRequest {
        RunRequest {
            working_dir: self.working_dir.clone(),
            content: self.content.clone(),
            env: self.env.clone(),
            check_mode: self.check_mode(),
            artifacts_history_limit: self.artifacts_history_limit,
            run_id: self.process.next_run_id(),
            timeout: self.timeout,
        }
    }
}

#[async_trait]
impl AnsibleRunner for PlaybookRunner {
    fn run_policy(&self) -> RunPolicy {
        self.policy
    }

    fn enable_check_mode(&self, enabled: bool) {
        self.check_mode.store(enabled, Ordering::SeqCst);
    }

    async fn write_extra_var(&self, object_name: &str, state: ResourceState) -> Result<()> {
        write_extra_var(&self.working_dir, object_name, state).await
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<RunOutcome> {
        self.process.run(self.request(), cancel.clone()).await
    }
}
