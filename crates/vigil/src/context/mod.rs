//! Context gathering for incidents.
//!
//! Collectors are independent adapters invoked concurrently per incident;
//! each is bounded by its own timeout, and a failing collector degrades its
//! own slice of the context instead of aborting the incident.

pub mod history;
pub mod logs;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::incident::IncidentEvent;

/// One collector's contribution to the incident context.
///
/// `collected` is false when the collector was disabled, errored, or timed
/// out; `error` then carries the reason. An empty `items` with
/// `collected == true` is a valid empty result, not a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSlice<T> {
    pub items: Vec<T>,
    pub collected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ContextSlice<T> {
    /// A successfully collected (possibly empty) slice.
    #[must_use]
    pub fn collected(items: Vec<T>) -> Self {
        Self {
            items,
            collected: true,
            error: None,
        }
    }

    /// A slice whose collection failed or was skipped.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            collected: false,
            error: Some(error.into()),
        }
    }
}

/// Aggregated evidence for one incident. Owned by a single pipeline
/// execution and discarded once notification completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentContext {
    pub logs: ContextSlice<LogLine>,
    pub commits: ContextSlice<CommitSummary>,
    pub diff: ContextSlice<FileChange>,
}

/// A single log line recovered from the log store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

/// Summary of one recent commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    pub message: String,
    pub author: String,
}

/// One file touched by the most recent commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
}

/// Deployment history around an incident: recent commits plus the head
/// commit's file changes. A diff failure degrades only the diff.
#[derive(Debug, Clone, Default)]
pub struct RecentHistory {
    pub commits: Vec<CommitSummary>,
    pub diff: Vec<FileChange>,
    pub diff_error: Option<String>,
}

/// Source of recent log lines for a failing workload.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Whether this source is configured at all.
    fn enabled(&self) -> bool;

    /// Fetch log lines around the incident time.
    async fn collect(&self, incident: &IncidentEvent) -> anyhow::Result<Vec<LogLine>>;
}

/// Source of recent deployment history.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Whether this source is configured at all.
    fn enabled(&self) -> bool;

    /// Fetch recent commits and the head commit's file changes.
    async fn collect(&self, incident: &IncidentEvent) -> anyhow::Result<RecentHistory>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_is_not_a_failure() {
        let slice: ContextSlice<LogLine> = ContextSlice::collected(vec![]);
        assert!(slice.collected);
        assert!(slice.error.is_none());
        assert!(slice.items.is_empty());
    }

    #[test]
    fn test_failed_slice_carries_reason() {
        let slice: ContextSlice<LogLine> = ContextSlice::failed("timed out after 5s");
        assert!(!slice.collected);
        assert_eq!(slice.error.as_deref(), Some("timed out after 5s"));
    }
}
