// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ansible Provider - Reconciliation Core
//!
//! This crate turns declarative run requests into invocations of the
//! external `ansible-runner` engine. It decides when to run, in which mode,
//! and how to interpret the outcome, and splits the object set across
//! replicas with advisory shard leases.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 Resource framework (external)                     │
//! │            observe / create / update / delete hooks               │
//! └──────────────────────────────────────────────────────────────────┘
//!                 │ ManagedRun                     ▲ Observation
//!                 ▼                                │
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                  ansible-provider (This Crate)                    │
//! │  ┌────────────┐  ┌──────────────┐  ┌────────────┐  ┌───────────┐ │
//! │  │ Reconciler │─►│ RunPolicy    │  │ JobEvents  │  │ Shard     │ │
//! │  │            │  │ decide()     │  │ diagnose() │  │ Filter    │ │
//! │  └────────────┘  └──────────────┘  └────────────┘  └───────────┘ │
//! │        │                                  ▲              ▲        │
//! │        ▼                                  │              │        │
//! │  ┌─────────────────────────────┐          │     ┌──────────────┐ │
//! │  │ RunnerProcess               │──────────┘     │ Shard        │ │
//! │  │ spawn / interrupt / kill    │                │ Coordinator  │ │
//! │  └─────────────────────────────┘                └──────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//!                 │                                        │
//!                 ▼                                        ▼
//!        ┌─────────────────┐                    ┌────────────────────┐
//!        │  ansible-runner │                    │ PostgreSQL leases  │
//!        │  {work_dir}/uid │                    │ (shard_leases)     │
//!        └─────────────────┘                    └────────────────────┘
//! ```
//!
//! # Run policies
//!
//! | Policy | Behavior |
//! |--------|----------|
//! | `ObserveAndDelete` | Apply when parameters differ from the last applied snapshot or the last sync failed |
//! | `CheckWhenObserve` | Run in check mode on every observation; drift means not up to date |
//!
//! # Configuration
//!
//! See [`config::Config`] for the environment variables. When
//! `PROVIDER_DATABASE_URL` is set, leases live in PostgreSQL and the
//! `shard_leases` table is created by the embedded migrations.

#![deny(missing_docs)]

/// Embedded schema migrations for the shard lease table.
///
/// ```ignore
/// use ansible_provider::migrations;
///
/// let pool = PgPool::connect(&database_url).await?;
/// migrations::run(&pool).await?;
/// ```
pub mod migrations;

/// Provider configuration loaded from environment variables.
pub mod config;

/// Error types for provider operations.
pub mod error;

/// Job event parsing and failure diagnosis.
pub mod job_events;

/// Run policies and the run/skip decision.
pub mod policy;

/// Observe/create/update/delete hooks.
pub mod reconciler;

/// Managed run objects and their annotations.
pub mod resource;

/// ansible-runner invocation.
pub mod runner;

/// Embeddable runtime for ansible-provider.
pub mod runtime;

/// Shard leases and the ownership predicate.
pub mod shard;

/// Process signal handling.
pub mod shutdown;

/// Check-mode statistics parsing.
pub mod stats;

/// Background worker for removing idle working directories.
pub mod workdir_gc;

pub use config::Config;
pub use error::{Error, Result};
