//! Agent configuration.
//!
//! All settings come from environment variables with workable defaults, so
//! the agent can run in-cluster with nothing but a service account and pick
//! up collaborator credentials from its pod environment.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use crate::watcher::BackoffConfig;

/// Event reasons treated as failure signals worth evaluating.
const DEFAULT_FAILURE_REASONS: &[&str] = &[
    "Failed",
    "BackOff",
    "Unhealthy",
    "FailedScheduling",
    "CrashLoopBackOff",
];

/// Event reasons that escalate to the paging channel.
const DEFAULT_CRITICAL_REASONS: &[&str] = &["CrashLoopBackOff"];

/// Top-level agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Reasons accepted by the event filter.
    pub failure_reasons: HashSet<String>,
    /// Reasons that trigger paging in addition to chat.
    pub critical_reasons: HashSet<String>,
    /// Suppression window for repeated signals with the same correlation key.
    pub dedup_window: Duration,
    /// Per-collector timeout for context gathering.
    pub collector_timeout: Duration,
    /// Dashboard link included in notifications.
    pub dashboard_url: Option<String>,
    /// Reconnect backoff for the event watcher.
    pub backoff: BackoffConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            failure_reasons: env_reason_set("FAILURE_REASONS", DEFAULT_FAILURE_REASONS),
            critical_reasons: env_reason_set("CRITICAL_REASONS", DEFAULT_CRITICAL_REASONS),
            dedup_window: Duration::from_secs(env_u64("DEDUP_WINDOW_SECS", 300)),
            collector_timeout: Duration::from_secs(env_u64("COLLECTOR_TIMEOUT_SECS", 5)),
            dashboard_url: env::var("DASHBOARD_URL").ok().filter(|s| !s.is_empty()),
            backoff: BackoffConfig::default(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated reason list from the environment, falling back to
/// the built-in default set.
fn env_reason_set(key: &str, default: &[&str]) -> HashSet<String> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect(),
        _ => default.iter().map(|r| (*r).to_string()).collect(),
    }
}
