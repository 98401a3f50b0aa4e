// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed lease store.
//!
//! Lets replicas in separate processes (or pods) contend for the same shard
//! records. Concurrency control is a `version` column checked in the `WHERE`
//! clause of every update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::lease::ShardLease;
use super::store::{LeaseError, LeaseStore};

#[derive(Debug, sqlx::FromRow)]
struct LeaseRow {
    name: String,
    shard: i32,
    holder: String,
    lease_duration_secs: i64,
    renew_time: DateTime<Utc>,
    version: i64,
}

impl From<LeaseRow> for ShardLease {
    fn from(row: LeaseRow) -> Self {
        Self {
            name: row.name,
            shard: row.shard as u32,
            holder: row.holder,
            lease_duration_secs: row.lease_duration_secs,
            renew_time: row.renew_time,
            version: row.version,
        }
    }
}

/// Lease store on the `shard_leases` table.
#[derive(Debug, Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    /// Create a store on an existing pool. Run [`crate::migrations::run`] first.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn get(&self, name: &str) -> Result<Option<ShardLease>, LeaseError> {
        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
            SELECT name, shard, holder, lease_duration_secs, renew_time, version
            FROM shard_leases
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ShardLease::from))
    }

    async fn create(&self, lease: &ShardLease) -> Result<ShardLease, LeaseError> {
        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
            INSERT INTO shard_leases (name, shard, holder, lease_duration_secs, renew_time, version)
            VALUES ($1, $2, $3, $4, $5, 1)
            ON CONFLICT (name) DO NOTHING
            RETURNING name, shard, holder, lease_duration_secs, renew_time, version
            "#,
        )
        .bind(&lease.name)
        .bind(lease.shard as i32)
        .bind(&lease.holder)
        .bind(lease.lease_duration_secs)
        .bind(lease.renew_time)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ShardLease::from)
            .ok_or_else(|| LeaseError::AlreadyExists(lease.name.clone()))
    }

    async fn update(&self, lease: &ShardLease) -> Result<ShardLease, LeaseError> {
        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
            UPDATE shard_leases
            SET holder = $2,
                lease_duration_secs = $3,
                renew_time = $4,
                version = version + 1
            WHERE name = $1 AND version = $5
            RETURNING name, shard, holder, lease_duration_secs, renew_time, version
            "#,
        )
        .bind(&lease.name)
        .bind(&lease.holder)
        .bind(lease.lease_duration_secs)
        .bind(lease.renew_time)
        .bind(lease.version)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ShardLease::from).ok_or_else(|| LeaseError::Conflict {
            name: lease.name.clone(),
            expected: lease.version,
        })
    }

    async fn delete(&self, name: &str, holder: &str) -> Result<bool, LeaseError> {
        let result = sqlx::query("DELETE FROM shard_leases WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
