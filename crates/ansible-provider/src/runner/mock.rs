// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runner for testing.
//!
//! Replays scripted outcomes instead of spawning ansible-runner and records
//! every call so tests can assert on side effects.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::traits::*;
use crate::policy::RunPolicy;

/// One recorded `run` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Check mode at the time of the call.
    pub check_mode: bool,
    /// Last state marker written before the call, with its object name.
    pub state: Option<(String, ResourceState)>,
}

/// Mock runner for testing.
#[derive(Debug)]
pub struct MockRunner {
    policy: RunPolicy,
    check_mode: AtomicBool,
    outcomes: Mutex<VecDeque<RunOutcome>>,
    state: Mutex<Option<(String, ResourceState)>>,
    calls: Mutex<Vec<MockCall>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new(RunPolicy::default())
    }
}

impl MockRunner {
    /// Create a mock runner whose runs succeed with empty output.
    pub fn new(policy: RunPolicy) -> Self {
        Self {
            policy,
            check_mode: AtomicBool::new(false),
            outcomes: Mutex::new(VecDeque::new()),
            state: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful run with the given stdout.
    pub fn then_succeed(mut self, stdout: impl Into<Vec<u8>>) -> Self {
        self.outcomes
            .get_mut()
            .push_back(RunOutcome::succeeded(Uuid::new_v4(), stdout.into()));
        self
    }

    /// Queue a failed run.
    pub fn then_fail(mut self, exit_code: i32, reason: Option<&str>) -> Self {
        self.outcomes.get_mut().push_back(RunOutcome {
            status: RunStatus::Failed {
                exit_code: Some(exit_code),
            },
            failure_reason: reason.map(str::to_string),
            ..RunOutcome::succeeded(Uuid::new_v4(), Vec::new())
        });
        self
    }

    /// Queue an arbitrary outcome.
    pub fn then(mut self, outcome: RunOutcome) -> Self {
        self.outcomes.get_mut().push_back(outcome);
        self
    }

    /// Recorded `run` calls.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().await.clone()
    }

    /// Number of `run` calls.
    pub async fn run_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Last state marker written.
    pub async fn last_state(&self) -> Option<(String, ResourceState)> {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl AnsibleRunner for MockRunner {
    fn run_policy(&self) -> RunPolicy {
        self.policy
    }

    fn enable_check_mode(&self, enabled: bool) {
        self.check_mode.store(enabled, Ordering::SeqCst);
    }

    async fn write_extra_var(&self, object_name: &str, state: ResourceState) -> Result<()> {
        *self.state.lock().await = Some((object_name.to_string(), state));
        Ok(())
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<RunOutcome> {
        let call = MockCall {
            check_mode: self.check_mode.load(Ordering::SeqCst),
            state: self.state.lock().await.clone(),
        };
        self.calls.lock().await.push(call);

        if cancel.is_cancelled() {
            return Ok(RunOutcome {
                status: RunStatus::Cancelled { forced: false },
                ..RunOutcome::succeeded(Uuid::new_v4(), Vec::new())
            });
        }

        let outcome = self.outcomes.lock().await.pop_front();
        Ok(outcome.unwrap_or_else(|| RunOutcome::succeeded(Uuid::new_v4(), Vec::new())))
    }
}
