// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run policies and the execution decision.
//!
//! | Policy             | Last applied == desired, last sync ok | Otherwise |
//! |--------------------|---------------------------------------|-----------|
//! | `ObserveAndDelete` | skip                                  | apply     |
//! | `CheckWhenObserve` | check                                 | check     |
//!
//! Deletion always applies with state `absent` and does not consult the policy.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::resource::ANNOTATION_RUN_POLICY;

/// Errors from run policy parsing.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyError {
    /// Policy name is not recognized.
    #[error("run policy {0:?} not supported")]
    Unsupported(String),
}

/// How often and in which mode the engine is invoked during observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunPolicy {
    /// Apply only when the desired parameters changed or the last run failed.
    #[default]
    ObserveAndDelete,
    /// Dry-run on every observation and report drift.
    CheckWhenObserve,
}

impl RunPolicy {
    /// Annotation value for this policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPolicy::ObserveAndDelete => "ObserveAndDelete",
            RunPolicy::CheckWhenObserve => "CheckWhenObserve",
        }
    }

    /// Read the policy from an object's annotations.
    ///
    /// A missing or empty annotation selects the default.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self, PolicyError> {
        annotations
            .get(ANNOTATION_RUN_POLICY)
            .map(String::as_str)
            .unwrap_or_default()
            .parse()
    }
}

impl FromStr for RunPolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "ObserveAndDelete" => Ok(RunPolicy::ObserveAndDelete),
            "CheckWhenObserve" => Ok(RunPolicy::CheckWhenObserve),
            other => Err(PolicyError::Unsupported(other.to_string())),
        }
    }
}

impl fmt::Display for RunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an observation must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Already converged; no run.
    Skip,
    /// Run in apply mode with state `present`.
    Apply,
    /// Run in check mode with state `present` and report drift.
    Check,
}

/// Decide whether an observation runs the engine, and in which mode.
pub fn decide<T: PartialEq>(
    policy: RunPolicy,
    last_applied: Option<&T>,
    desired: &T,
    last_sync_ok: bool,
) -> Decision {
    match policy {
        RunPolicy::CheckWhenObserve => Decision::Check,
        RunPolicy::ObserveAndDelete => match last_applied {
            Some(last) if last == desired && last_sync_ok => Decision::Skip,
            _ => Decision::Apply,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        assert_eq!("".parse::<RunPolicy>().unwrap(), RunPolicy::ObserveAndDelete);
        assert_eq!(
            "ObserveAndDelete".parse::<RunPolicy>().unwrap(),
            RunPolicy::ObserveAndDelete
        );
        assert_eq!(
            "CheckWhenObserve".parse::<RunPolicy>().unwrap(),
            RunPolicy::CheckWhenObserve
        );
        assert_eq!(
            "Always".parse::<RunPolicy>().unwrap_err(),
            PolicyError::Unsupported("Always".to_string())
        );
    }

    #[test]
    fn test_from_annotations() {
        let mut annotations = BTreeMap::new();
        assert_eq!(
            RunPolicy::from_annotations(&annotations).unwrap(),
            RunPolicy::ObserveAndDelete
        );

        annotations.insert(ANNOTATION_RUN_POLICY.to_string(), "CheckWhenObserve".to_string());
        assert_eq!(
            RunPolicy::from_annotations(&annotations).unwrap(),
            RunPolicy::CheckWhenObserve
        );

        annotations.insert(ANNOTATION_RUN_POLICY.to_string(), "bogus".to_string());
        assert!(RunPolicy::from_annotations(&annotations).is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        for policy in [RunPolicy::ObserveAndDelete, RunPolicy::CheckWhenObserve] {
            assert_eq!(policy.to_string().parse::<RunPolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn test_converged_skips_every_time() {
        for _ in 0..3 {
            assert_eq!(
                decide(RunPolicy::ObserveAndDelete, Some(&1), &1, true),
                Decision::Skip
            );
        }
    }

    #[test]
    fn test_failed_sync_is_retried() {
        assert_eq!(
            decide(RunPolicy::ObserveAndDelete, Some(&1), &1, false),
            Decision::Apply
        );
    }

    #[test]
    fn test_changed_or_missing_snapshot_applies() {
        assert_eq!(
            decide(RunPolicy::ObserveAndDelete, Some(&1), &2, true),
            Decision::Apply
        );
        assert_eq!(
            decide::<i32>(RunPolicy::ObserveAndDelete, None, &1, true),
            Decision::Apply
        );
    }

    #[test]
    fn test_check_when_observe_always_checks() {
        assert_eq!(
            decide(RunPolicy::CheckWhenObserve, Some(&1), &1, true),
            Decision::Check
        );
        assert_eq!(
            decide::<i32>(RunPolicy::CheckWhenObserve, None, &1, false),
            Decision::Check
        );
    }
}
