// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for ansible-provider.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::runner::Parameters;

/// Provider configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// ansible-runner executable
    pub runner_binary: PathBuf,
    /// Base directory; one subdirectory per managed object
    pub work_dir: PathBuf,
    /// Default roles path
    pub roles_path: Option<PathBuf>,
    /// Collections path
    pub collections_path: Option<PathBuf>,
    /// Artifact directories kept per object (`--rotate-artifacts`)
    pub artifacts_history_limit: u32,
    /// Number of replicas sharing the workload
    pub replicas: u32,
    /// PostgreSQL URL for the shared lease store
    pub database_url: Option<String>,
    /// How long a shard lease stays valid without renewal
    pub lease_duration: Duration,
    /// How often the holder renews its lease
    pub renew_interval: Duration,
    /// Sleep between scans when every shard is taken
    pub retry_interval: Duration,
    /// Upper bound on one engine run
    pub run_timeout: Duration,
    /// Interrupt-to-kill window when stopping a run
    pub grace_period: Duration,
    /// Age after which idle working directories are removed
    pub workdir_max_age: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let runner_binary =
            PathBuf::from(var("ANSIBLE_RUNNER_BINARY").unwrap_or_else(|| "ansible-runner".to_string()));
        let work_dir =
            PathBuf::from(var("PROVIDER_WORK_DIR").unwrap_or_else(|| "/ansibleDir".to_string()));
        let roles_path = var("ANSIBLE_ROLES_PATH").map(PathBuf::from);
        let collections_path = var("ANSIBLE_COLLECTIONS_PATH").map(PathBuf::from);

        let artifacts_history_limit = parse_or(&var, "ARTIFACTS_HISTORY_LIMIT", 10u32)?;

        let replicas = parse_or(&var, "PROVIDER_REPLICAS", 1u32)?;
        if replicas == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PROVIDER_REPLICAS",
                value: "0".to_string(),
            });
        }

        // Replicas in separate processes need a shared lease store.
        let database_url = var("PROVIDER_DATABASE_URL");
        if replicas > 1 && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("PROVIDER_DATABASE_URL"));
        }

        let lease_duration = secs_or(&var, "SHARD_LEASE_DURATION_SECS", 30)?;
        let renew_interval = secs_or(&var, "SHARD_RENEW_INTERVAL_SECS", 5)?;
        let retry_interval = secs_or(&var, "SHARD_RETRY_INTERVAL_SECS", 5)?;
        if renew_interval >= lease_duration {
            return Err(ConfigError::InvalidValue {
                key: "SHARD_RENEW_INTERVAL_SECS",
                value: renew_interval.as_secs().to_string(),
            });
        }

        Ok(Self {
            runner_binary,
            work_dir,
            roles_path,
            collections_path,
            artifacts_history_limit,
            replicas,
            database_url,
            lease_duration,
            renew_interval,
            retry_interval,
            run_timeout: secs_or(&var, "RUN_TIMEOUT_SECS", 1200)?,
            grace_period: secs_or(&var, "RUN_GRACE_PERIOD_SECS", 10)?,
            workdir_max_age: secs_or(&var, "WORKDIR_MAX_AGE_SECS", 86400)?,
        })
    }

    /// Working directory for one managed object.
    pub fn object_dir(&self, uid: &str) -> PathBuf {
        self.work_dir.join(uid)
    }

    /// Runner parameters for one managed object. A zero run timeout disables it.
    pub fn parameters(&self, uid: &str) -> Parameters {
        Parameters {
            runner_binary: self.runner_binary.clone(),
            working_dir: self.object_dir(uid),
            roles_path: self.roles_path.clone(),
            collections_path: self.collections_path.clone(),
            artifacts_history_limit: self.artifacts_history_limit,
            grace_period: self.grace_period,
            run_timeout: (!self.run_timeout.is_zero()).then_some(self.run_timeout),
        }
    }
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

fn secs_or<F>(var: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(var, key, default).map(Duration::from_secs)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable has an unusable value.
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}
