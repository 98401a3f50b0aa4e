// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lease store trait and in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use super::lease::ShardLease;

/// Errors from lease store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LeaseError {
    /// A record with this name already exists.
    #[error("Lease already exists: {0}")]
    AlreadyExists(String),

    /// The record changed since it was read.
    #[error("Lease {name} was modified concurrently (expected version {expected})")]
    Conflict {
        /// Lease name.
        name: String,
        /// Version the writer expected.
        expected: i64,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage for shard lease records.
///
/// Stores are PURE record keepers: they do not interpret expiry. Writes are
/// optimistic, so two replicas racing on the same record cannot both succeed
/// from the same read.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read a lease by name.
    async fn get(&self, name: &str) -> Result<Option<ShardLease>, LeaseError>;

    /// Create a lease; fails with [`LeaseError::AlreadyExists`] if one exists.
    ///
    /// Returns the stored record with its assigned version.
    async fn create(&self, lease: &ShardLease) -> Result<ShardLease, LeaseError>;

    /// Overwrite a lease whose stored version equals `lease.version`.
    ///
    /// Fails with [`LeaseError::Conflict`] otherwise. Returns the stored
    /// record with its new version.
    async fn update(&self, lease: &ShardLease) -> Result<ShardLease, LeaseError>;

    /// Delete a lease if it is still held by `holder`.
    ///
    /// Returns whether a record was deleted.
    async fn delete(&self, name: &str, holder: &str) -> Result<bool, LeaseError>;
}

/// Process-local lease store.
///
/// Enough for a single replica and for tests; replicas in different
/// processes need a shared store such as
/// [`PgLeaseStore`](super::postgres::PgLeaseStore).
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, ShardLease>>,
}

impl InMemoryLeaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn get(&self, name: &str) -> Result<Option<ShardLease>, LeaseError> {
        Ok(self.leases.lock().await.get(name).cloned())
    }

    async fn create(&self, lease: &ShardLease) -> Result<ShardLease, LeaseError> {
        let mut leases = self.leases.lock().await;
        if leases.contains_key(&lease.name) {
            return Err(LeaseError::AlreadyExists(lease.name.clone()));
        }
        let stored = ShardLease {
            version: 1,
            ..lease.clone()
        };
        leases.insert(stored.name.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, lease: &ShardLease) -> Result<ShardLease, LeaseError> {
        let mut leases = self.leases.lock().await;
        let conflict = || LeaseError::Conflict {
            name: lease.name.clone(),
            expected: lease.version,
        };
        let current = leases.get_mut(&lease.name).ok_or_else(conflict)?;
        if current.version != lease.version {
            return Err(conflict());
        }
        *current = ShardLease {
            version: lease.version + 1,
            ..lease.clone()
        };
        Ok(current.clone())
    }

    async fn delete(&self, name: &str, holder: &str) -> Result<bool, LeaseError> {
        let mut leases = self.leases.lock().await;
        match leases.get(name) {
            Some(lease) if lease.holder == holder => {
                leases.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::lease::{ReplicaIdentity, lease_name};
    use chrono::Utc;
    use std::time::Duration;

    fn new_lease(holder: &str) -> ShardLease {
        ShardLease::new(
            lease_name("test", 0),
            0,
            &ReplicaIdentity::from_string(holder),
            Duration::from_secs(30),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = InMemoryLeaseStore::new();
        let created = store.create(&new_lease("a")).await.unwrap();
        assert_eq!(created.version, 1);

        let fetched = store.get(&created.name).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let store = InMemoryLeaseStore::new();
        store.create(&new_lease("a")).await.unwrap();
        let err = store.create(&new_lease("b")).await.unwrap_err();
        assert!(matches!(err, LeaseError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_checks_version() {
        let store = InMemoryLeaseStore::new();
        let created = store.create(&new_lease("a")).await.unwrap();

        let mut next = created.clone();
        next.holder = "b".to_string();
        let updated = store.update(&next).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.holder, "b");

        // Stale write from the same read loses.
        let err = store.update(&next).await.unwrap_err();
        assert!(matches!(err, LeaseError::Conflict { expected: 1, .. }));
    }

    #[tokio::test]
    async fn test_delete_only_by_holder() {
        let store = InMemoryLeaseStore::new();
        let created = store.create(&new_lease("a")).await.unwrap();

        assert!(!store.delete(&created.name, "b").await.unwrap());
        assert!(store.get(&created.name).await.unwrap().is_some());

        assert!(store.delete(&created.name, "a").await.unwrap());
        assert!(store.get(&created.name).await.unwrap().is_none());
        assert!(!store.delete(&created.name, "a").await.unwrap());
    }
}
