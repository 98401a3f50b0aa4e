// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work partitioning across replicas.
//!
//! Each replica holds an advisory lease on one shard index and reconciles
//! only the objects whose name hashes to that index.

pub mod coordinator;
pub mod lease;
pub mod postgres;
pub mod predicate;
pub mod store;

pub use coordinator::{CoordinatorError, ShardAssignment, ShardCoordinator, ShardCoordinatorConfig};
pub use lease::{ReplicaIdentity, ShardLease, lease_name};
pub use postgres::PgLeaseStore;
pub use predicate::{ShardFilter, belongs_to_shard, fnv1a_32, shard_for};
pub use store::{InMemoryLeaseStore, LeaseError, LeaseStore};
