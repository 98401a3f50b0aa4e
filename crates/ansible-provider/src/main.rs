// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ansible Provider - replica process
//!
//! Claims one shard lease, keeps it renewed, and collects idle working
//! directories until SIGTERM/SIGINT or until the lease is lost. Losing the
//! lease exits non-zero so the orchestrator restarts the replica.

use tracing::{info, warn};

use ansible_provider::config::Config;
use ansible_provider::runtime::{ProviderRuntime, connect_lease_store};
use ansible_provider::shard::CoordinatorError;
use ansible_provider::shutdown::install_shutdown_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ansible_provider=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        runner_binary = %config.runner_binary.display(),
        work_dir = %config.work_dir.display(),
        replicas = config.replicas,
        "Starting Ansible Provider"
    );

    let lease_store = connect_lease_store(&config).await?;
    let shutdown = install_shutdown_handler()?;

    // Blocks until a shard is free
    let runtime_config = ProviderRuntime::builder()
        .config(config)
        .lease_store(lease_store)
        .shutdown_token(shutdown)
        .build()?;
    let runtime = match runtime_config.start().await {
        Ok(runtime) => runtime,
        Err(e) if matches!(e.downcast_ref(), Some(CoordinatorError::Cancelled)) => {
            info!("Shutdown requested before a shard was acquired");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    info!(
        shard = runtime.shard(),
        identity = %runtime.identity(),
        "Ansible Provider ready"
    );

    runtime.wait_for_shutdown().await;
    info!("Shutdown signal received");

    // Err here means the lease was lost
    runtime.shutdown().await?;

    info!("Ansible Provider shut down");

    Ok(())
}
