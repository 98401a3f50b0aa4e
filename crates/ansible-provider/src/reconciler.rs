// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Observe/create/update/delete for one managed run.
//!
//! The surrounding resource framework calls these hooks; this module decides
//! whether the engine runs, in which mode, and what gets recorded on the
//! object afterwards. Retries are driven by the framework re-invoking
//! `observe`, never by loops here.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::policy::{Decision, decide};
use crate::resource::{ANNOTATION_LAST_APPLIED, ANNOTATION_RUN_POLICY, Condition, ManagedRun, RunParameters};
use crate::runner::{AnsibleRunner, ResourceState, Result, RunnerError};
use crate::stats::parse_results;

/// What `observe` learned about the external resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Whether the resource is considered to exist.
    pub resource_exists: bool,
    /// Whether it matches the desired parameters.
    pub resource_up_to_date: bool,
}

impl Observation {
    fn converged() -> Self {
        Self {
            resource_exists: true,
            resource_up_to_date: true,
        }
    }
}

/// Drives an [`AnsibleRunner`] for one managed run.
pub struct Reconciler<R> {
    runner: R,
    cancel: CancellationToken,
}

impl<R: AnsibleRunner> Reconciler<R> {
    /// Create a reconciler. `cancel` stops in-flight runs.
    pub fn new(runner: R, cancel: CancellationToken) -> Self {
        Self { runner, cancel }
    }

    /// Underlying runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Observe the run and converge it if the policy says so.
    pub async fn observe(&self, run: &mut ManagedRun) -> Result<Observation> {
        let policy = self.runner.run_policy();
        if run.annotation(ANNOTATION_RUN_POLICY).unwrap_or_default().is_empty() {
            run.set_annotation(ANNOTATION_RUN_POLICY, policy.as_str());
        }

        if run.deletion_requested {
            return Ok(Observation {
                resource_exists: run.condition != Some(Condition::Deleting),
                resource_up_to_date: true,
            });
        }

        let last_applied = last_applied_parameters(run)?;
        let decision = decide(
            policy,
            last_applied.as_ref(),
            &run.parameters,
            run.last_sync_ok(),
        );
        debug!(name = %run.name, policy = %policy, decision = ?decision, "Observed run");

        match decision {
            Decision::Skip => Ok(Observation::converged()),
            Decision::Apply => {
                self.apply(run, ResourceState::Present).await?;
                Ok(Observation::converged())
            }
            Decision::Check => {
                self.runner
                    .write_extra_var(&run.name, ResourceState::Present)
                    .await?;
                self.runner.enable_check_mode(true);
                let stdout = self
                    .execute(run)
                    .await
                    .inspect_err(|e| mark_failed(run, e))?;
                let results = parse_results(&stdout)
                    .map_err(RunnerError::from)
                    .inspect_err(|e| mark_failed(run, e))?;
                run.set_condition(Condition::Available);
                let changed = results.has_changes();
                if changed {
                    info!(name = %run.name, hosts = ?results.changed_hosts(), "Check run reports drift");
                }
                Ok(Observation {
                    resource_exists: true,
                    resource_up_to_date: !changed,
                })
            }
        }
    }

    /// Create the external resource. Same as [`update`](Self::update).
    pub async fn create(&self, run: &mut ManagedRun) -> Result<()> {
        self.update(run).await
    }

    /// Run in apply mode with state `present`.
    pub async fn update(&self, run: &mut ManagedRun) -> Result<()> {
        self.apply(run, ResourceState::Present).await
    }

    /// Run in apply mode with state `absent`.
    ///
    /// The object is treated as gone once the run succeeds; the engine's
    /// reported state is not consulted.
    pub async fn delete(&self, run: &mut ManagedRun) -> Result<()> {
        run.set_condition(Condition::Deleting);
        self.runner
            .write_extra_var(&run.name, ResourceState::Absent)
            .await?;
        self.runner.enable_check_mode(false);
        self.execute(run)
            .await
            .inspect_err(|e| mark_failed(run, e))?;
        info!(name = %run.name, "Deleted run");
        Ok(())
    }

    async fn apply(&self, run: &mut ManagedRun, state: ResourceState) -> Result<()> {
        self.runner.write_extra_var(&run.name, state).await?;
        self.runner.enable_check_mode(false);
        if let Err(e) = self.execute(run).await {
            mark_failed(run, &e);
            return Err(e);
        }

        let snapshot = serde_json::to_string(&run.parameters)?;
        run.set_annotation(ANNOTATION_LAST_APPLIED, snapshot);
        run.set_condition(Condition::Available);
        info!(name = %run.name, "Applied run");
        Ok(())
    }

    async fn execute(&self, run: &ManagedRun) -> Result<Vec<u8>> {
        let outcome = self.runner.run(&self.cancel).await?;
        debug!(
            name = %run.name,
            run_id = %outcome.run_id,
            status = ?outcome.status,
            "Run finished"
        );
        outcome.into_result()
    }
}

fn mark_failed(run: &mut ManagedRun, error: &RunnerError) {
    warn!(name = %run.name, error = %error, "Run failed");
    run.set_condition(Condition::Unavailable {
        message: error.to_string(),
    });
}

/// Parse the last applied parameters annotation, if present.
pub fn last_applied_parameters(run: &ManagedRun) -> Result<Option<RunParameters>> {
    match run.annotation(ANNOTATION_LAST_APPLIED) {
        Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
        None => Ok(None),
    }
}
