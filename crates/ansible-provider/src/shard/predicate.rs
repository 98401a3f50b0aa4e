// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shard membership of managed objects.
//!
//! An object belongs to shard `fnv1a_32(name) % replica_count`. The hash is
//! 32-bit FNV-1a so that every implementation, in any language, partitions the
//! same names the same way.

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV32_OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV32_PRIME)
    })
}

/// Shard index an object name maps to, or `None` when there are no replicas.
pub fn shard_for(object_name: &str, replica_count: u32) -> Option<u32> {
    if replica_count == 0 {
        return None;
    }
    Some(fnv1a_32(object_name.as_bytes()) % replica_count)
}

/// Whether `object_name` is reconciled by the replica holding `shard_index`.
pub fn belongs_to_shard(object_name: &str, shard_index: u32, replica_count: u32) -> bool {
    shard_for(object_name, replica_count) == Some(shard_index)
}

/// Filter installed in front of the reconcile loop once a shard is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardFilter {
    shard_index: u32,
    replica_count: u32,
}

impl ShardFilter {
    /// Create a filter for one shard out of `replica_count`.
    pub fn new(shard_index: u32, replica_count: u32) -> Self {
        Self {
            shard_index,
            replica_count,
        }
    }

    /// Filter that accepts every object (single replica).
    pub fn all() -> Self {
        Self::new(0, 1)
    }

    /// Shard index this filter accepts.
    pub fn shard_index(&self) -> u32 {
        self.shard_index
    }

    /// Total number of shards.
    pub fn replica_count(&self) -> u32 {
        self.replica_count
    }

    /// Whether this replica should reconcile the named object.
    pub fn matches(&self, object_name: &str) -> bool {
        belongs_to_shard(object_name, self.shard_index, self.replica_count)
    }
}
