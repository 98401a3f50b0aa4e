// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ansible-provider.

use thiserror::Error;

/// Provider errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Running ansible-runner failed.
    #[error("Runner error: {0}")]
    Runner(#[from] crate::runner::RunnerError),

    /// Shard coordination failed.
    #[error("Shard error: {0}")]
    Shard(#[from] crate::shard::CoordinatorError),

    /// Lease store operation failed.
    #[error("Lease error: {0}")]
    Lease(#[from] crate::shard::LeaseError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the provider Error.
pub type Result<T> = std::result::Result<T, Error>;
