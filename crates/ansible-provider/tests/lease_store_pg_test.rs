// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the PostgreSQL lease store.

use std::sync::Arc;
use std::time::Duration;

use ansible_provider::shard::{
    LeaseError, LeaseStore, PgLeaseStore, ReplicaIdentity, ShardCoordinator,
    ShardCoordinatorConfig, ShardLease,
};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_PROVIDER_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_PROVIDER_DATABASE_URL not set");
            return;
        }
    };
}

/// Get a database pool for testing
async fn get_test_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_PROVIDER_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    ansible_provider::migrations::run(&pool).await.ok()?;
    Some(pool)
}

/// Unique lease name so concurrent test runs do not collide
fn unique_name() -> String {
    format!("test-{}-shard-0", Uuid::new_v4())
}

async fn cleanup(pool: &PgPool, name: &str) {
    sqlx::query("DELETE FROM shard_leases WHERE name = $1")
        .bind(name)
        .execute(pool)
        .await
        .ok();
}

fn lease(name: &str, holder: &str) -> ShardLease {
    ShardLease::new(
        name,
        0,
        &ReplicaIdentity::from_string(holder),
        Duration::from_secs(30),
        Utc::now(),
    )
}

#[tokio::test]
async fn test_create_and_get() {
    skip_if_no_db!();
    let pool = get_test_pool().await.unwrap();
    let store = PgLeaseStore::new(pool.clone());
    let name = unique_name();

    assert!(store.get(&name).await.unwrap().is_none());

    let created = store.create(&lease(&name, "replica-a")).await.unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(created.holder, "replica-a");

    let fetched = store.get(&name).await.unwrap().unwrap();
    assert_eq!(fetched.name, name);
    assert_eq!(fetched.shard, 0);
    assert_eq!(fetched.lease_duration_secs, 30);
    assert_eq!(fetched.version, 1);

    cleanup(&pool, &name).await;
}

#[tokio::test]
async fn test_create_conflict() {
    skip_if_no_db!();
    let pool = get_test_pool().await.unwrap();
    let store = PgLeaseStore::new(pool.clone());
    let name = unique_name();

    store.create(&lease(&name, "replica-a")).await.unwrap();
    let err = store.create(&lease(&name, "replica-b")).await.unwrap_err();
    assert!(matches!(err, LeaseError::AlreadyExists(n) if n == name));

    cleanup(&pool, &name).await;
}

#[tokio::test]
async fn test_update_checks_version() {
    skip_if_no_db!();
    let pool = get_test_pool().await.unwrap();
    let store = PgLeaseStore::new(pool.clone());
    let name = unique_name();

    let created = store.create(&lease(&name, "replica-a")).await.unwrap();
    let takeover = created.renewed_by(
        &ReplicaIdentity::from_string("replica-b"),
        Duration::from_secs(30),
        Utc::now(),
    );

    let updated = store.update(&takeover).await.unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.holder, "replica-b");

    // Same read, second writer loses
    let err = store.update(&takeover).await.unwrap_err();
    assert!(matches!(err, LeaseError::Conflict { expected: 1, .. }));

    cleanup(&pool, &name).await;
}

#[tokio::test]
async fn test_delete_only_by_holder() {
    skip_if_no_db!();
    let pool = get_test_pool().await.unwrap();
    let store = PgLeaseStore::new(pool.clone());
    let name = unique_name();

    store.create(&lease(&name, "replica-a")).await.unwrap();
    assert!(!store.delete(&name, "replica-b").await.unwrap());
    assert!(store.delete(&name, "replica-a").await.unwrap());
    assert!(store.get(&name).await.unwrap().is_none());
}

#[tokio::test]
async fn test_coordinators_share_database() {
    skip_if_no_db!();
    let pool = get_test_pool().await.unwrap();
    let prefix = format!("test-{}", Uuid::new_v4());
    let config = ShardCoordinatorConfig {
        replica_count: 2,
        lease_duration: Duration::from_secs(30),
        renew_interval: Duration::from_millis(100),
        retry_interval: Duration::from_millis(100),
        lease_prefix: prefix.clone(),
    };

    let a = Arc::new(ShardCoordinator::new(
        Arc::new(PgLeaseStore::new(pool.clone())),
        ReplicaIdentity::from_string("replica-a"),
        config.clone(),
    ));
    let b = Arc::new(ShardCoordinator::new(
        Arc::new(PgLeaseStore::new(pool.clone())),
        ReplicaIdentity::from_string("replica-b"),
        config,
    ));

    let shutdown = tokio_util::sync::CancellationToken::new();
    let first = a.acquire_and_hold(shutdown.clone()).await.unwrap();
    let second = b.acquire_and_hold(shutdown.clone()).await.unwrap();
    assert_ne!(first.shard(), second.shard());

    shutdown.cancel();
    first.wait().await.unwrap();
    second.wait().await.unwrap();

    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM shard_leases WHERE name LIKE $1")
            .bind(format!("{}-%", prefix))
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(remaining, 0);
}
