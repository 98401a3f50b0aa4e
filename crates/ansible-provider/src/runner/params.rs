// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Working directory preparation.
//!
//! [`Parameters::init`] turns a [`ManagedRun`] into a ready-to-run
//! [`PlaybookRunner`]: it validates the content selection, writes inline
//! content into the working directory, seeds `env/extravars`, resolves the
//! roles path and parses the run policy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::ansible::PlaybookRunner;
use super::extravars::{create_env_dir, extravars_path, write_private_file};
use super::process::RunnerProcess;
use super::traits::{Result, RunContent, RunnerError};
use crate::policy::RunPolicy;
use crate::resource::ManagedRun;

/// Behavior var naming the roles path.
pub const ANSIBLE_ROLES_PATH_VAR: &str = "ANSIBLE_ROLE_PATH";

/// Environment variable naming the collections path.
pub const ANSIBLE_COLLECTIONS_PATH_VAR: &str = "ANSIBLE_COLLECTIONS_PATH";

/// Environment variable pointing ansible at the inventory.
pub const ANSIBLE_INVENTORY_VAR: &str = "ANSIBLE_INVENTORY";

/// File holding an inline playbook.
pub const PLAYBOOK_YML: &str = "playbook.yml";

/// File holding an inline inventory.
pub const HOSTS: &str = "hosts";

/// Settings shared by every run of one managed object.
#[derive(Debug, Clone)]
pub struct Parameters {
    /// ansible-runner executable.
    pub runner_binary: PathBuf,
    /// Per-object working directory.
    pub working_dir: PathBuf,
    /// Configured roles path.
    pub roles_path: Option<PathBuf>,
    /// Configured collections path.
    pub collections_path: Option<PathBuf>,
    /// Artifact directories kept per object.
    pub artifacts_history_limit: u32,
    /// Interrupt-to-kill window.
    pub grace_period: Duration,
    /// Upper bound on one run.
    pub run_timeout: Option<Duration>,
}

impl Parameters {
    /// Prepare the working directory for `run` and build its runner.
    ///
    /// `behavior_vars` are provider-level environment overrides passed to every
    /// run (e.g. from the provider config).
    pub async fn init(
        &self,
        run: &ManagedRun,
        behavior_vars: &BTreeMap<String, String>,
    ) -> Result<PlaybookRunner> {
        let params = &run.parameters;

        tokio::fs::create_dir_all(&self.working_dir).await?;

        let content = match (&params.playbook_inline, params.roles.first()) {
            (None, None) => {
                return Err(RunnerError::InvalidParameters(
                    "at least a playbook or a role should be provided".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(RunnerError::InvalidParameters(
                    "cannot execute a playbook and roles at the same time".to_string(),
                ));
            }
            (Some(playbook), None) => {
                tokio::fs::write(self.working_dir.join(PLAYBOOK_YML), playbook).await?;
                RunContent::Playbook {
                    target: self.working_dir.clone(),
                    playbook: PLAYBOOK_YML.to_string(),
                }
            }
            (None, Some(role)) => {
                let roles_path = select_role_path(
                    behavior_vars,
                    self.roles_path.as_deref(),
                    std::env::var(ANSIBLE_ROLES_PATH_VAR).ok(),
                    &default_role_paths(),
                )
                .ok_or_else(|| {
                    RunnerError::InvalidParameters(format!(
                        "cannot determine roles path for role {:?}",
                        role.name
                    ))
                })?;
                RunContent::Role {
                    name: role.name.clone(),
                    roles_path,
                }
            }
        };

        if let Some(inventory) = &params.inventory_inline {
            tokio::fs::write(self.working_dir.join(HOSTS), inventory).await?;
        }

        // The extravars file must exist, even empty, for later state markers.
        create_env_dir(&self.working_dir).await?;
        let vars = match &params.vars {
            Some(serde_json::Value::Null) | None => Vec::new(),
            Some(vars) => serde_json::to_vec(vars)?,
        };
        write_private_file(&extravars_path(&self.working_dir), &vars).await?;

        let policy = RunPolicy::from_annotations(&run.annotations)?;

        let mut env = BTreeMap::new();
        if let Some(path) = &self.collections_path {
            env.insert(
                ANSIBLE_COLLECTIONS_PATH_VAR.to_string(),
                path.display().to_string(),
            );
        }
        env.extend(behavior_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.insert(
            ANSIBLE_INVENTORY_VAR.to_string(),
            self.working_dir.join(HOSTS).display().to_string(),
        );

        debug!(
            name = %run.name,
            working_dir = %self.working_dir.display(),
            policy = %policy,
            "Prepared working directory"
        );

        let process = RunnerProcess::new(&self.runner_binary).with_grace_period(self.grace_period);
        Ok(PlaybookRunner::new(
            process,
            self.working_dir.clone(),
            content,
            env,
            policy,
            self.artifacts_history_limit,
            self.run_timeout,
        ))
    }
}

/// Resolve the roles path.
///
/// Lookup order: behavior var, configured path, process environment, then
/// the first existing entry of `defaults`.
pub fn select_role_path(
    behavior_vars: &BTreeMap<String, String>,
    configured: Option<&Path>,
    from_env: Option<String>,
    defaults: &[PathBuf],
) -> Option<PathBuf> {
    if let Some(path) = behavior_vars.get(ANSIBLE_ROLES_PATH_VAR).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    if let Some(path) = configured.filter(|p| !p.as_os_str().is_empty()) {
        return Some(path.to_path_buf());
    }
    if let Some(path) = from_env {
        return Some(PathBuf::from(path));
    }
    defaults.iter().find(|p| p.exists()).cloned()
}

/// Ansible's built-in roles search path.
pub fn default_role_paths() -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(3);
    if let Some(home) = current_user_home() {
        paths.push(home.join(".ansible/roles"));
    }
    paths.push(PathBuf::from("/usr/share/ansible/roles"));
    paths.push(PathBuf::from("/etc/ansible/roles"));
    paths
}

fn current_user_home() -> Option<PathBuf> {
    match nix::unistd::User::from_uid(nix::unistd::getuid()) {
        Ok(Some(user)) => Some(user.dir),
        _ => std::env::var_os("HOME").map(PathBuf::from),
    }
}
