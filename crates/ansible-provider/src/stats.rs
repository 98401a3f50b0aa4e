// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Check-mode result parsing.
//!
//! In check mode ansible-runner's stdout is buffered rather than forwarded.
//! With the JSON stdout callback it contains a single JSON document whose
//! `stats` section reports per-host counters. A run "has changes" when any
//! host reports a nonzero `changed` count.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

/// Errors from parsing check-mode output.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StatsError {
    /// Output contained no JSON document.
    #[error("no JSON results found in ansible-runner output")]
    NoResults,

    /// The JSON document did not match the expected shape.
    #[error("parsing ansible-runner JSON results: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-host counters from the `stats` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HostStats {
    /// Tasks that succeeded without changes.
    #[serde(default)]
    pub ok: u64,
    /// Tasks that reported (or would report) a change.
    #[serde(default)]
    pub changed: u64,
    /// Failed tasks.
    #[serde(default)]
    pub failures: u64,
    /// Unreachable attempts.
    #[serde(default)]
    pub unreachable: u64,
    /// Skipped tasks.
    #[serde(default)]
    pub skipped: u64,
    /// Rescued tasks.
    #[serde(default)]
    pub rescued: u64,
    /// Failures ignored via `ignore_errors`.
    #[serde(default)]
    pub ignored: u64,
}

/// Parsed playbook results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybookResults {
    /// Counters keyed by host name.
    #[serde(default)]
    pub stats: BTreeMap<String, HostStats>,
}

impl PlaybookResults {
    /// True if any host reports a nonzero changed count.
    pub fn has_changes(&self) -> bool {
        self.stats.values().any(|s| s.changed != 0)
    }

    /// Hosts with a nonzero changed count.
    pub fn changed_hosts(&self) -> Vec<&str> {
        self.stats
            .iter()
            .filter(|(_, s)| s.changed != 0)
            .map(|(host, _)| host.as_str())
            .collect()
    }
}

/// Parse buffered check-mode stdout.
///
/// Lines before the first one starting with `{` are ignored (warnings the
/// engine prints ahead of the callback output). Anything after the first
/// complete JSON document is ignored as well.
pub fn parse_results(stdout: &[u8]) -> Result<PlaybookResults, StatsError> {
    let text = String::from_utf8_lossy(stdout);

    let mut offset = 0;
    let mut start = None;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with('{') {
            start = Some(offset);
            break;
        }
        offset += line.len();
    }
    let start = start.ok_or(StatsError::NoResults)?;

    let mut stream =
        serde_json::Deserializer::from_str(&text[start..]).into_iter::<PlaybookResults>();
    match stream.next() {
        Some(result) => Ok(result?),
        None => Err(StatsError::NoResults),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANGED_OUTPUT: &str = r#"[WARNING]: provided hosts list is empty
{
    "custom_stats": {},
    "plays": [{"play": {"name": "test"}, "tasks": []}],
    "stats": {
        "localhost": {"changed": 1, "failures": 0, "ignored": 0, "ok": 2, "rescued": 0, "skipped": 0, "unreachable": 0},
        "web-1": {"changed": 0, "ok": 2}
    }
}
"#;

    #[test]
    fn test_parse_results_with_changes() {
        let results = parse_results(CHANGED_OUTPUT.as_bytes()).unwrap();
        assert_eq!(results.stats.len(), 2);
        assert!(results.has_changes());
        assert_eq!(results.changed_hosts(), vec!["localhost"]);
        assert_eq!(results.stats["localhost"].ok, 2);
    }

    #[test]
    fn test_parse_results_without_changes() {
        let output = r#"{"stats": {"localhost": {"changed": 0, "ok": 3}}}"#;
        let results = parse_results(output.as_bytes()).unwrap();
        assert!(!results.has_changes());
        assert!(results.changed_hosts().is_empty());
    }

    #[test]
    fn test_parse_results_empty_stats() {
        let results = parse_results(b"{\"plays\": []}").unwrap();
        assert!(results.stats.is_empty());
        assert!(!results.has_changes());
    }

    #[test]
    fn test_parse_results_no_json() {
        let err = parse_results(b"PLAY RECAP ****\nlocalhost : ok=1\n").unwrap_err();
        assert!(matches!(err, StatsError::NoResults));
        assert!(matches!(parse_results(b"").unwrap_err(), StatsError::NoResults));
    }

    #[test]
    fn test_parse_results_truncated_json() {
        let err = parse_results(b"{\"stats\": {\"h\": ").unwrap_err();
        assert!(matches!(err, StatsError::Json(_)));
    }
}
