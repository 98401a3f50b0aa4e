// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for ansible-provider integration tests.
//!
//! Provides a fake ansible-runner: a shell script that records its argv and
//! environment, then executes a test-specific body.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

/// Serializes tests that write and exec scripts.
///
/// A script written while another thread forks can fail to exec with
/// ETXTBSY, because the forked child still holds the write descriptor.
static SPAWN_LOCK: Mutex<()> = Mutex::const_new(());

/// Hold for the duration of any test that spawns a fake engine.
pub async fn spawn_lock() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().await
}

/// Shell prologue shared by all fake engines.
///
/// Sets `$dir` to the private data dir (second argument) and `$ident` to
/// the `--ident` value.
const PROLOGUE: &str = r#"#!/bin/sh
dir="$2"
ident=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--ident" ]; then ident="$a"; fi
  prev="$a"
done
"#;

/// A fake ansible-runner executable.
pub struct FakeEngine {
    /// Script path.
    pub path: PathBuf,
    args_file: PathBuf,
    env_file: PathBuf,
}

impl FakeEngine {
    /// Write a fake engine into `dir` running `body` after the prologue.
    pub fn new(dir: &Path, body: &str) -> Self {
        let path = dir.join("fake-ansible-runner");
        let args_file = dir.join("engine-args");
        let env_file = dir.join("engine-env");

        let script = format!(
            "{PROLOGUE}printf '%s\\n' \"$@\" > '{args}'\nenv > '{env}'\n{body}\n",
            args = args_file.display(),
            env = env_file.display(),
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            path,
            args_file,
            env_file,
        }
    }

    /// Arguments of the last invocation.
    pub fn args(&self) -> Vec<String> {
        std::fs::read_to_string(&self.args_file)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Environment of the last invocation.
    pub fn env(&self) -> BTreeMap<String, String> {
        std::fs::read_to_string(&self.env_file)
            .unwrap()
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Body that writes one failed-task job event and exits 2.
pub fn failing_with_event_body() -> String {
    r#"mkdir -p "$dir/artifacts/$ident/job_events"
cat > "$dir/artifacts/$ident/job_events/1-e1.json" <<'EOF'
{"uuid": "e1", "event": "runner_on_failed", "stdout": "", "event_data": {"play": "test", "task": "file", "host": "testhost", "res": {"msg": "fake error"}, "ignore_errors": false}}
EOF
exit 2"#
        .to_string()
}

/// Body that signals readiness, waits, and exits 130 on SIGINT.
///
/// `ready` is touched once the trap is installed; `interrupted` once the
/// trap has fired.
pub fn interruptible_body(ready: &Path, interrupted: &Path) -> String {
    format!(
        r#"trap 'touch "{interrupted}"; kill $pid 2>/dev/null; exit 130' INT
sleep 30 >/dev/null 2>&1 &
pid=$!
touch "{ready}"
wait $pid"#,
        ready = ready.display(),
        interrupted = interrupted.display(),
    )
}

/// Body that records SIGINT but keeps running until killed.
pub fn stubborn_body(ready: &Path, interrupted: &Path) -> String {
    format!(
        r#"trap 'touch "{interrupted}"' INT
sleep 30 >/dev/null 2>&1 &
pid=$!
touch "{ready}"
while kill -0 $pid 2>/dev/null; do
  wait $pid
done"#,
        ready = ready.display(),
        interrupted = interrupted.display(),
    )
}

/// Body that ignores SIGINT and leaves a child holding stdout open.
pub fn pipe_holding_body(ready: &Path) -> String {
    format!(
        r#"trap '' INT
echo '{{"plays": [], "stats": {{}}}}'
sleep 20 &
touch "{ready}"
wait"#,
        ready = ready.display(),
    )
}

/// Poll until `path` exists.
pub async fn wait_for_file(path: &Path) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", path.display()));
}
