// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for ansible-provider.
//!
//! [`ProviderRuntime`] claims a shard lease for this replica, keeps it
//! renewed, runs the working directory collector, and hands out reconcilers
//! for the objects that belong to the claimed shard.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ansible_provider::config::Config;
//! use ansible_provider::runtime::ProviderRuntime;
//! use ansible_provider::shard::InMemoryLeaseStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = ProviderRuntime::builder()
//!         .config(Config::from_env()?)
//!         .lease_store(Arc::new(InMemoryLeaseStore::new()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... feed objects through runtime.reconciler_for(&run) ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::reconciler::Reconciler;
use crate::resource::ManagedRun;
use crate::runner::PlaybookRunner;
use crate::shard::{
    InMemoryLeaseStore, LeaseStore, PgLeaseStore, ReplicaIdentity, ShardAssignment,
    ShardCoordinator, ShardCoordinatorConfig, ShardFilter,
};
use crate::workdir_gc::{WorkdirGc, WorkdirGcConfig};

/// Default prefix for shard lease names.
pub const DEFAULT_LEASE_PREFIX: &str = "ansible-provider";

/// Builder for [`ProviderRuntime`].
pub struct ProviderRuntimeBuilder {
    config: Option<Config>,
    lease_store: Option<Arc<dyn LeaseStore>>,
    identity: Option<ReplicaIdentity>,
    lease_prefix: String,
    behavior_vars: BTreeMap<String, String>,
    gc_poll_interval: Duration,
    shutdown: Option<CancellationToken>,
}

impl Default for ProviderRuntimeBuilder {
    fn default() -> Self {
        Self {
            config: None,
            lease_store: None,
            identity: None,
            lease_prefix: DEFAULT_LEASE_PREFIX.to_string(),
            behavior_vars: BTreeMap::new(),
            gc_poll_interval: Duration::from_secs(3600),
            shutdown: None,
        }
    }
}

impl ProviderRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the lease store (required).
    pub fn lease_store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.lease_store = Some(store);
        self
    }

    /// Set the lease holder identity. Defaults to a random one.
    pub fn identity(mut self, identity: ReplicaIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the prefix for shard lease names.
    pub fn lease_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lease_prefix = prefix.into();
        self
    }

    /// Add an environment override passed to every run.
    pub fn behavior_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.behavior_vars.insert(key.into(), value.into());
        self
    }

    /// Set how often the working directory collector scans.
    pub fn gc_poll_interval(mut self, interval: Duration) -> Self {
        self.gc_poll_interval = interval;
        self
    }

    /// Use an existing shutdown token instead of a fresh one.
    ///
    /// The runtime cancels this token itself if the shard lease is lost.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Build the runtime configuration.
    pub fn build(self) -> Result<ProviderRuntimeConfig> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;
        let lease_store = self
            .lease_store
            .ok_or_else(|| anyhow::anyhow!("lease_store is required"))?;
        if self.lease_prefix.is_empty() {
            return Err(anyhow::anyhow!("lease_prefix must not be empty"));
        }

        Ok(ProviderRuntimeConfig {
            coordinator: ShardCoordinatorConfig {
                replica_count: config.replicas,
                lease_duration: config.lease_duration,
                renew_interval: config.renew_interval,
                retry_interval: config.retry_interval,
                lease_prefix: self.lease_prefix,
            },
            gc: WorkdirGcConfig {
                work_dir: config.work_dir.clone(),
                poll_interval: self.gc_poll_interval,
                max_age: config.workdir_max_age,
            },
            config,
            lease_store,
            identity: self.identity.unwrap_or_else(ReplicaIdentity::generate),
            behavior_vars: self.behavior_vars,
            shutdown: self.shutdown.unwrap_or_default(),
        })
    }
}

/// Configuration for starting a [`ProviderRuntime`].
pub struct ProviderRuntimeConfig {
    config: Config,
    lease_store: Arc<dyn LeaseStore>,
    identity: ReplicaIdentity,
    coordinator: ShardCoordinatorConfig,
    gc: WorkdirGcConfig,
    behavior_vars: BTreeMap<String, String>,
    shutdown: CancellationToken,
}

impl ProviderRuntimeConfig {
    /// Claim a shard and start background workers.
    ///
    /// Blocks until a shard lease is acquired or the shutdown token fires.
    pub async fn start(self) -> Result<ProviderRuntime> {
        info!(
            identity = %self.identity,
            replicas = self.coordinator.replica_count,
            work_dir = %self.config.work_dir.display(),
            "Starting ProviderRuntime"
        );

        // The collector only touches this replica's work dir, so it can run
        // while the shard is still contended.
        let gc_shutdown = self.shutdown.child_token();
        let gc = WorkdirGc::new(self.gc);
        let gc_token = gc_shutdown.clone();
        let gc_handle = tokio::spawn(async move {
            gc.run(gc_token).await;
        });

        let coordinator = Arc::new(ShardCoordinator::new(
            self.lease_store,
            self.identity.clone(),
            self.coordinator,
        ));

        let assignment = match coordinator.acquire_and_hold(self.shutdown.clone()).await {
            Ok(assignment) => assignment,
            Err(e) => {
                gc_shutdown.cancel();
                if let Err(join_err) = gc_handle.await {
                    error!("Working directory collector task panicked: {}", join_err);
                }
                return Err(e.into());
            }
        };

        let filter = assignment.filter();
        info!(
            shard = filter.shard_index(),
            replicas = filter.replica_count(),
            "ProviderRuntime started"
        );

        Ok(ProviderRuntime {
            config: self.config,
            identity: self.identity,
            behavior_vars: self.behavior_vars,
            filter,
            assignment,
            gc_handle,
            gc_shutdown,
            shutdown: self.shutdown,
        })
    }
}

/// Running provider replica.
pub struct ProviderRuntime {
    config: Config,
    identity: ReplicaIdentity,
    behavior_vars: BTreeMap<String, String>,
    filter: ShardFilter,
    assignment: ShardAssignment,
    gc_handle: JoinHandle<()>,
    gc_shutdown: CancellationToken,
    shutdown: CancellationToken,
}

impl ProviderRuntime {
    /// Create a new builder.
    pub fn builder() -> ProviderRuntimeBuilder {
        ProviderRuntimeBuilder::new()
    }

    /// Provider configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lease holder identity of this replica.
    pub fn identity(&self) -> &ReplicaIdentity {
        &self.identity
    }

    /// Claimed shard index.
    pub fn shard(&self) -> u32 {
        self.assignment.shard()
    }

    /// Predicate selecting the objects this replica reconciles.
    pub fn filter(&self) -> ShardFilter {
        self.filter
    }

    /// Token cancelled on shutdown or lease loss.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Prepare a reconciler for `run`.
    ///
    /// Returns `None` when the object belongs to another replica's shard.
    /// Runs started through the reconciler are interrupted on shutdown.
    pub async fn reconciler_for(
        &self,
        run: &ManagedRun,
    ) -> crate::error::Result<Option<Reconciler<PlaybookRunner>>> {
        if !self.filter.matches(&run.name) {
            return Ok(None);
        }

        let dir_key = if run.uid.is_empty() { &run.name } else { &run.uid };
        let runner = self
            .config
            .parameters(dir_key)
            .init(run, &self.behavior_vars)
            .await?;
        Ok(Some(Reconciler::new(runner, self.shutdown.child_token())))
    }

    /// Wait until shutdown is requested or the lease is lost.
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.cancelled().await;
    }

    /// Shut down the runtime, releasing the shard lease.
    ///
    /// Returns an error if the lease had been lost before shutdown.
    pub async fn shutdown(self) -> Result<()> {
        info!("ProviderRuntime shutting down...");

        self.shutdown.cancel();
        self.gc_shutdown.cancel();

        if let Err(e) = self.gc_handle.await {
            error!("Working directory collector task panicked: {}", e);
        }

        match self.assignment.wait().await {
            Ok(()) => {
                info!("ProviderRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("ProviderRuntime lease renewal failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }
}

/// Build the lease store for `config`.
///
/// With a database URL this connects, applies migrations, and returns the
/// shared PostgreSQL store; otherwise a process-local store.
pub async fn connect_lease_store(config: &Config) -> crate::error::Result<Arc<dyn LeaseStore>> {
    match &config.database_url {
        Some(url) => {
            info!("Connecting to lease database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await?;
            crate::migrations::run(&pool).await?;
            Ok(Arc::new(PgLeaseStore::new(pool)))
        }
        None => {
            info!("No lease database configured, using in-memory lease store");
            Ok(Arc::new(InMemoryLeaseStore::new()))
        }
    }
}
