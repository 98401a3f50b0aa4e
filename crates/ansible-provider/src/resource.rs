// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Managed run objects.
//!
//! A [`ManagedRun`] is the provider's view of one declarative run request:
//! its identity, annotations, desired [`RunParameters`] and the condition
//! surfaced after the last reconciliation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Annotation selecting the run policy.
pub const ANNOTATION_RUN_POLICY: &str = "ansible.crossplane.io/runPolicy";

/// Annotation holding the last applied parameters as JSON.
pub const ANNOTATION_LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// A role to execute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name, resolved under the roles path.
    pub name: String,
    /// Where the role was fetched from, if remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

/// Desired parameters of a run.
///
/// Exactly one of `playbook_inline` and `roles` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParameters {
    /// Inline playbook content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook_inline: Option<String>,
    /// Roles to run. Only the first is executed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<Role>,
    /// Variables passed to the playbook or role as extra vars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<Value>,
    /// Inline inventory content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_inline: Option<String>,
}

/// Condition reported on a managed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// The last run succeeded.
    Available,
    /// The last run failed.
    Unavailable {
        /// Diagnosed or raw error message.
        message: String,
    },
    /// Deletion is in progress.
    Deleting,
}

/// One declarative run request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagedRun {
    /// Object name; the shard key.
    pub name: String,
    /// Object UID.
    pub uid: String,
    /// Annotations, including run policy and last applied parameters.
    pub annotations: BTreeMap<String, String>,
    /// Desired parameters.
    pub parameters: RunParameters,
    /// Condition from the last reconciliation, if any.
    pub condition: Option<Condition>,
    /// Whether deletion has been requested.
    pub deletion_requested: bool,
}

impl ManagedRun {
    /// Create a run with no annotations and no condition.
    pub fn new(name: impl Into<String>, parameters: RunParameters) -> Self {
        Self {
            name: name.into(),
            parameters,
            ..Default::default()
        }
    }

    /// Get an annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Set an annotation.
    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.annotations.insert(key.to_string(), value.into());
    }

    /// Whether the last reconciliation left the object available.
    pub fn last_sync_ok(&self) -> bool {
        matches!(self.condition, Some(Condition::Available))
    }

    /// Set the condition.
    pub fn set_condition(&mut self, condition: Condition) {
        self.condition = Some(condition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameters_json_shape() {
        let params = RunParameters {
            playbook_inline: Some("- hosts: all\n".to_string()),
            vars: Some(json!({"foo": "bar"})),
            ..Default::default()
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(
            value,
            json!({"playbookInline": "- hosts: all\n", "vars": {"foo": "bar"}})
        );

        let back: RunParameters = serde_json::from_value(value).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_last_sync_ok() {
        let mut run = ManagedRun::new("r", RunParameters::default());
        assert!(!run.last_sync_ok());
        run.set_condition(Condition::Available);
        assert!(run.last_sync_ok());
        run.set_condition(Condition::Unavailable {
            message: "boom".to_string(),
        });
        assert!(!run.last_sync_ok());
    }
}
