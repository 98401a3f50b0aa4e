// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for removing idle working directories.
//!
//! Each managed object gets `{PROVIDER_WORK_DIR}/{uid}/` holding its inline
//! content, `env/extravars` and the engine's rotated artifacts. The engine
//! bounds the artifacts itself, but directories of deleted objects stay
//! behind. This worker periodically removes directories that have not been
//! touched for longer than the configured age.
//!
//! A directory's age is taken from `env/extravars`, which every run rewrites,
//! falling back to the directory's own modification time.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::runner::extravars::extravars_path;

/// Configuration for the working directory collector.
#[derive(Debug, Clone)]
pub struct WorkdirGcConfig {
    /// Base directory containing per-object directories.
    pub work_dir: PathBuf,
    /// How often to scan.
    pub poll_interval: Duration,
    /// Idle age after which a directory is removed.
    pub max_age: Duration,
}

impl Default for WorkdirGcConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/ansibleDir"),
            poll_interval: Duration::from_secs(3600), // 1 hour
            max_age: Duration::from_secs(24 * 3600),  // 24 hours
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Directories removed.
    pub removed: u64,
    /// Directories that could not be inspected or removed.
    pub errors: u64,
}

/// Background worker that removes idle working directories.
pub struct WorkdirGc {
    config: WorkdirGcConfig,
}

impl WorkdirGc {
    /// Create a new collector.
    pub fn new(config: WorkdirGcConfig) -> Self {
        Self { config }
    }

    /// Run the collector loop until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            work_dir = %self.config.work_dir.display(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_age_hours = self.config.max_age.as_secs() / 3600,
            "Working directory collector started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Working directory collector received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.sweep(SystemTime::now()).await {
                        error!(error = %e, "Failed to sweep working directories");
                    }
                }
            }
        }

        info!("Working directory collector stopped");
    }

    /// Remove every object directory idle for longer than `max_age` as of `now`.
    pub async fn sweep(&self, now: SystemTime) -> std::io::Result<SweepStats> {
        let mut stats = SweepStats::default();

        let mut entries = match tokio::fs::read_dir(&self.config.work_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Work directory does not exist, nothing to clean");
                return Ok(stats);
            }
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }

            let modified = match last_activity(&path).await {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to read working directory metadata");
                    stats.errors += 1;
                    continue;
                }
            };

            let idle = now.duration_since(modified).unwrap_or_default();
            if idle <= self.config.max_age {
                continue;
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(
                        path = %path.display(),
                        idle_secs = idle.as_secs(),
                        "Removed idle working directory"
                    );
                    stats.removed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove working directory");
                    stats.errors += 1;
                }
            }
        }

        if stats.removed > 0 || stats.errors > 0 {
            info!(
                removed = stats.removed,
                errors = stats.errors,
                "Working directory sweep completed"
            );
        } else {
            debug!("Working directory sweep completed, nothing to remove");
        }

        Ok(stats)
    }
}

async fn last_activity(dir: &Path) -> std::io::Result<SystemTime> {
    match tokio::fs::metadata(extravars_path(dir)).await {
        Ok(m) => m.modified(),
        Err(_) => tokio::fs::metadata(dir).await?.modified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gc(work_dir: &Path, max_age: Duration) -> WorkdirGc {
        WorkdirGc::new(WorkdirGcConfig {
            work_dir: work_dir.to_path_buf(),
            poll_interval: Duration::from_secs(3600),
            max_age,
        })
    }

    #[tokio::test]
    async fn test_sweep_removes_only_idle_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let obj = temp_dir.path().join("obj-1");
        std::fs::create_dir_all(obj.join("env")).unwrap();
        std::fs::write(extravars_path(&obj), "{}").unwrap();
        std::fs::write(temp_dir.path().join("stray-file"), "x").unwrap();

        let collector = gc(temp_dir.path(), Duration::from_secs(60));

        let stats = collector.sweep(SystemTime::now()).await.unwrap();
        assert_eq!(stats, SweepStats::default());
        assert!(obj.exists());

        let later = SystemTime::now() + Duration::from_secs(120);
        let stats = collector.sweep(later).await.unwrap();
        assert_eq!(stats.removed, 1);
        assert!(!obj.exists());
        assert!(temp_dir.path().join("stray-file").exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_work_dir() {
        let temp_dir = TempDir::new().unwrap();
        let collector = gc(&temp_dir.path().join("missing"), Duration::from_secs(60));
        let stats = collector.sweep(SystemTime::now()).await.unwrap();
        assert_eq!(stats, SweepStats::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let collector = gc(temp_dir.path(), Duration::from_secs(60));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), collector.run(shutdown))
            .await
            .unwrap();
    }
}
