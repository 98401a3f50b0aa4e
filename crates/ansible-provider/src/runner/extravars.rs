// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `env/extravars` handling.
//!
//! ansible-runner reads extra variables from `<working_dir>/env/extravars`.
//! The provider stores the object's state marker there under
//! `ansible_provider_meta`, leaving every other key alone.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use tokio::io::AsyncWriteExt;

use super::traits::{ResourceState, Result, RunnerError};

/// Key holding the provider's state markers.
pub const PROVIDER_META_KEY: &str = "ansible_provider_meta";

/// Permissions for files under `env/`.
pub(crate) const ENV_FILE_MODE: u32 = 0o600;

/// Permissions for the `env/` directory.
pub(crate) const ENV_DIR_MODE: u32 = 0o700;

/// Directory holding ansible-runner env files.
pub fn env_dir(working_dir: &Path) -> PathBuf {
    working_dir.join("env")
}

/// Path of the extra vars file.
pub fn extravars_path(working_dir: &Path) -> PathBuf {
    env_dir(working_dir).join("extravars")
}

/// Create `env/` with owner-only permissions.
pub(crate) async fn create_env_dir(working_dir: &Path) -> Result<()> {
    tokio::fs::DirBuilder::new()
        .recursive(true)
        .mode(ENV_DIR_MODE)
        .create(env_dir(working_dir))
        .await?;
    Ok(())
}

/// Write a file with owner-only permissions.
///
/// New files are created 0600. An existing file is narrowed to 0600 before
/// the contents are written.
pub(crate) async fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(ENV_FILE_MODE)
        .open(path)
        .await?;
    file.set_permissions(std::fs::Permissions::from_mode(ENV_FILE_MODE))
        .await?;
    file.write_all(contents).await?;
    file.flush().await?;
    Ok(())
}

/// Read the extra vars object; a missing or empty file is an empty object.
pub async fn read_extra_vars(working_dir: &Path) -> Result<Map<String, Value>> {
    let data = match tokio::fs::read(extravars_path(working_dir)).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice(&data)? {
        Value::Object(map) => Ok(map),
        other => Err(RunnerError::InvalidParameters(format!(
            "extravars must be a JSON object, found {}",
            json_type(&other)
        ))),
    }
}

/// Merge the state marker for `object_name` into the extra vars file.
pub async fn write_extra_var(working_dir: &Path, object_name: &str, state: ResourceState) -> Result<()> {
    let mut vars = read_extra_vars(working_dir).await?;
    let mut meta = Map::new();
    meta.insert(object_name.to_string(), json!({ "state": state.as_str() }));
    vars.insert(PROVIDER_META_KEY.to_string(), Value::Object(meta));

    create_env_dir(working_dir).await?;
    let bytes = serde_json::to_vec(&Value::Object(vars))?;
    write_private_file(&extravars_path(working_dir), &bytes).await
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_file() {
        let temp_dir = TempDir::new().unwrap();
        write_extra_var(temp_dir.path(), "my-run", ResourceState::Present)
            .await
            .unwrap();

        let vars = read_extra_vars(temp_dir.path()).await.unwrap();
        assert_eq!(
            Value::Object(vars),
            json!({"ansible_provider_meta": {"my-run": {"state": "present"}}})
        );

        let mode = std::fs::metadata(extravars_path(temp_dir.path()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_private_file_narrows_existing_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secret");
        std::fs::write(&path, b"old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_private_file(&path, b"{\"password\": \"hunter2\"}")
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{"password": "hunter2"}"#
        );
    }

    #[tokio::test]
    async fn test_write_keeps_existing_keys() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(env_dir(temp_dir.path())).unwrap();
        std::fs::write(
            extravars_path(temp_dir.path()),
            r#"{"foo": "bar", "ansible_provider_meta": {"old": {"state": "present"}}}"#,
        )
        .unwrap();

        write_extra_var(temp_dir.path(), "my-run", ResourceState::Absent)
            .await
            .unwrap();

        let vars = read_extra_vars(temp_dir.path()).await.unwrap();
        assert_eq!(vars["foo"], json!("bar"));
        assert_eq!(
            vars[PROVIDER_META_KEY],
            json!({"my-run": {"state": "absent"}})
        );
    }

    #[tokio::test]
    async fn test_empty_file_is_empty_object() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(env_dir(temp_dir.path())).unwrap();
        std::fs::write(extravars_path(temp_dir.path()), "").unwrap();
        assert!(read_extra_vars(temp_dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_object_rejected() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(env_dir(temp_dir.path())).unwrap();
        std::fs::write(extravars_path(temp_dir.path()), "[1, 2]").unwrap();
        let err = read_extra_vars(temp_dir.path()).await.unwrap_err();
        assert!(matches!(err, RunnerError::InvalidParameters(_)));
    }
}
