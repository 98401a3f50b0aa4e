// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shard lease records and replica identity.
//!
//! A lease is advisory: its holder is valid only while
//! `now - renew_time < lease_duration`. Once expired, any replica may
//! overwrite it. The `version` counter gives stores optimistic concurrency
//! but is not a fence; expiry is the only fencing mechanism.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier a replica uses as lease holder.
///
/// Generated once per process and never reused across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaIdentity(String);

impl ReplicaIdentity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Use a fixed identity (tests, or an operator-provided pod name).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the lease record for a shard.
pub fn lease_name(prefix: &str, shard: u32) -> String {
    format!("{}-shard-{}", prefix, shard)
}

/// A versioned lease record keyed by shard index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLease {
    /// Record name (see [`lease_name`]).
    pub name: String,
    /// Shard index the lease covers.
    pub shard: u32,
    /// Current holder.
    pub holder: String,
    /// How long the holder stays valid after a renewal, in seconds.
    pub lease_duration_secs: i64,
    /// Last acquisition or renewal.
    pub renew_time: DateTime<Utc>,
    /// Store-assigned version, bumped on every write.
    pub version: i64,
}

impl ShardLease {
    /// New unversioned lease held by `holder` as of `now`.
    pub fn new(
        name: impl Into<String>,
        shard: u32,
        holder: &ReplicaIdentity,
        lease_duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            shard,
            holder: holder.as_str().to_string(),
            lease_duration_secs: lease_duration.as_secs() as i64,
            renew_time: now,
            version: 0,
        }
    }

    /// Lease duration as a chrono duration.
    pub fn lease_duration(&self) -> Duration {
        Duration::seconds(self.lease_duration_secs)
    }

    /// True once `now - renew_time` has reached the lease duration.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.renew_time >= self.lease_duration()
    }

    /// Whether `identity` is the recorded holder.
    pub fn is_held_by(&self, identity: &ReplicaIdentity) -> bool {
        self.holder == identity.as_str()
    }

    /// Whether this lease prevents `identity` from taking the shard at `now`.
    pub fn blocks(&self, identity: &ReplicaIdentity, now: DateTime<Utc>) -> bool {
        !self.is_held_by(identity) && !self.is_expired(now)
    }

    /// Copy of this lease taken over (or renewed) by `identity` at `now`.
    pub fn renewed_by(
        &self,
        identity: &ReplicaIdentity,
        lease_duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            holder: identity.as_str().to_string(),
            lease_duration_secs: lease_duration.as_secs() as i64,
            renew_time: now,
            ..self.clone()
        }
    }
}
