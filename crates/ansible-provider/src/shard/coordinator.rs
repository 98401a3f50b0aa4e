// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shard acquisition and renewal.
//!
//! A replica scans shard indices `0..replica_count` and takes the first one
//! whose lease is missing, expired, or already its own. It then renews that
//! lease in the background. A failed renewal is fatal: the coordinator
//! cancels the process-wide shutdown token so the replica stops reconciling
//! under a shard it may no longer own. On a graceful shutdown the lease is
//! deleted so another replica can take the shard without waiting for expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::lease::{ReplicaIdentity, ShardLease, lease_name};
use super::predicate::ShardFilter;
use super::store::{LeaseError, LeaseStore};

/// Errors from shard coordination.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoordinatorError {
    /// Replica count was zero.
    #[error("replica count must be at least 1")]
    NoReplicas,

    /// Shutdown was requested before a shard was acquired.
    #[error("shard acquisition cancelled")]
    Cancelled,

    /// A renewal failed; another replica may now own the shard.
    #[error("lost lease for shard {shard}")]
    LeaseLost {
        /// Shard whose lease was lost.
        shard: u32,
    },

    /// Lease store error.
    #[error(transparent)]
    Lease(#[from] LeaseError),

    /// The renewal task panicked or was aborted.
    #[error("renewal task failed: {0}")]
    Task(String),
}

/// Configuration for the shard coordinator.
#[derive(Debug, Clone)]
pub struct ShardCoordinatorConfig {
    /// Number of shards (one per replica).
    pub replica_count: u32,
    /// How long a lease stays valid without renewal.
    pub lease_duration: Duration,
    /// How often the holder renews.
    pub renew_interval: Duration,
    /// Sleep between full scans when every shard is held.
    pub retry_interval: Duration,
    /// Prefix for lease record names.
    pub lease_prefix: String,
}

impl Default for ShardCoordinatorConfig {
    fn default() -> Self {
        Self {
            replica_count: 1,
            lease_duration: Duration::from_secs(30),
            renew_interval: Duration::from_secs(5), // lease_duration / 6
            retry_interval: Duration::from_secs(5),
            lease_prefix: "ansible-provider".to_string(),
        }
    }
}

/// A held shard plus its background renewal task.
#[derive(Debug)]
pub struct ShardAssignment {
    shard: u32,
    replica_count: u32,
    renewal: JoinHandle<Result<(), CoordinatorError>>,
}

impl ShardAssignment {
    /// Shard index this replica owns.
    pub fn shard(&self) -> u32 {
        self.shard
    }

    /// Total number of shards.
    pub fn replica_count(&self) -> u32 {
        self.replica_count
    }

    /// Filter selecting the objects this replica reconciles.
    pub fn filter(&self) -> ShardFilter {
        ShardFilter::new(self.shard, self.replica_count)
    }

    /// Wait for the renewal task to finish.
    ///
    /// Returns `Ok(())` after a graceful release and
    /// [`CoordinatorError::LeaseLost`] when a renewal failed.
    pub async fn wait(self) -> Result<(), CoordinatorError> {
        match self.renewal.await {
            Ok(result) => result,
            Err(e) => Err(CoordinatorError::Task(e.to_string())),
        }
    }
}

/// Acquires, renews and releases this replica's shard lease.
pub struct ShardCoordinator {
    store: Arc<dyn LeaseStore>,
    identity: ReplicaIdentity,
    config: ShardCoordinatorConfig,
}

impl ShardCoordinator {
    /// Create a new coordinator.
    pub fn new(
        store: Arc<dyn LeaseStore>,
        identity: ReplicaIdentity,
        config: ShardCoordinatorConfig,
    ) -> Self {
        Self {
            store,
            identity,
            config,
        }
    }

    /// Identity used as lease holder.
    pub fn identity(&self) -> &ReplicaIdentity {
        &self.identity
    }

    /// Coordinator configuration.
    pub fn config(&self) -> &ShardCoordinatorConfig {
        &self.config
    }

    fn lease_name(&self, shard: u32) -> String {
        lease_name(&self.config.lease_prefix, shard)
    }

    /// Try to take or renew the lease for `shard` now.
    pub async fn try_acquire(&self, shard: u32) -> Result<bool, LeaseError> {
        self.try_acquire_at(shard, Utc::now()).await
    }

    /// Try to take or renew the lease for `shard` as of `now`.
    ///
    /// Returns `Ok(false)` when another live holder has it, or when another
    /// replica won a write race on the same record.
    pub async fn try_acquire_at(&self, shard: u32, now: DateTime<Utc>) -> Result<bool, LeaseError> {
        let name = self.lease_name(shard);

        match self.store.get(&name).await? {
            None => {
                let lease = ShardLease::new(
                    name,
                    shard,
                    &self.identity,
                    self.config.lease_duration,
                    now,
                );
                match self.store.create(&lease).await {
                    Ok(_) => Ok(true),
                    Err(LeaseError::AlreadyExists(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            }
            Some(existing) if existing.blocks(&self.identity, now) => {
                debug!(
                    shard = shard,
                    holder = %existing.holder,
                    "Shard held by another replica"
                );
                Ok(false)
            }
            Some(existing) => {
                if !existing.is_held_by(&self.identity) {
                    info!(
                        shard = shard,
                        previous_holder = %existing.holder,
                        "Taking over expired shard lease"
                    );
                }
                let next = existing.renewed_by(&self.identity, self.config.lease_duration, now);
                match self.store.update(&next).await {
                    Ok(_) => Ok(true),
                    Err(LeaseError::Conflict { .. }) => Ok(false),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Block until a shard is acquired, then keep it renewed in the background.
    ///
    /// Scans every shard index, sleeping `retry_interval` between full scans.
    /// Store errors during the scan count as contention. Returns
    /// [`CoordinatorError::Cancelled`] if `shutdown` fires first.
    pub async fn acquire_and_hold(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<ShardAssignment, CoordinatorError> {
        let replica_count = self.config.replica_count;
        if replica_count == 0 {
            return Err(CoordinatorError::NoReplicas);
        }

        info!(
            identity = %self.identity,
            replica_count = replica_count,
            "Acquiring shard lease"
        );

        loop {
            if shutdown.is_cancelled() {
                return Err(CoordinatorError::Cancelled);
            }

            for shard in 0..replica_count {
                match self.try_acquire(shard).await {
                    Ok(true) => {
                        info!(
                            shard = shard,
                            identity = %self.identity,
                            "Acquired shard lease"
                        );
                        let renewal = tokio::spawn(self.clone().hold(shard, shutdown.clone()));
                        return Ok(ShardAssignment {
                            shard,
                            replica_count,
                            renewal,
                        });
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(shard = shard, error = %e, "Failed to acquire shard lease");
                    }
                }
            }

            debug!(
                retry_secs = self.config.retry_interval.as_secs_f64(),
                "All shards held, retrying"
            );

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Err(CoordinatorError::Cancelled),
                _ = tokio::time::sleep(self.config.retry_interval) => {}
            }
        }
    }

    /// Renewal loop for a held shard.
    async fn hold(
        self: Arc<Self>,
        shard: u32,
        shutdown: CancellationToken,
    ) -> Result<(), CoordinatorError> {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    self.release(shard).await;
                    return Ok(());
                }

                _ = tokio::time::sleep(self.config.renew_interval) => {
                    match self.try_acquire(shard).await {
                        Ok(true) => debug!(shard = shard, "Renewed shard lease"),
                        Ok(false) => {
                            error!(shard = shard, "Shard lease taken by another replica, shutting down");
                            shutdown.cancel();
                            return Err(CoordinatorError::LeaseLost { shard });
                        }
                        Err(e) => {
                            error!(shard = shard, error = %e, "Failed to renew shard lease, shutting down");
                            shutdown.cancel();
                            return Err(CoordinatorError::LeaseLost { shard });
                        }
                    }
                }
            }
        }
    }

    /// Best-effort delete of this replica's lease for `shard`.
    pub async fn release(&self, shard: u32) -> bool {
        let name = self.lease_name(shard);
        match self.store.delete(&name, self.identity.as_str()).await {
            Ok(true) => {
                info!(shard = shard, "Released shard lease");
                true
            }
            Ok(false) => {
                debug!(shard = shard, "Shard lease already gone or held by another replica");
                false
            }
            Err(e) => {
                warn!(shard = shard, error = %e, "Failed to release shard lease");
                false
            }
        }
    }
}
