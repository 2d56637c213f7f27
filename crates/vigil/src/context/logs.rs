//! Loki collector for historical pod logs.
//!
//! Queries Grafana Loki for the failing workload's logs around the incident
//! time, so evidence survives even after the pod has been garbage collected.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{LogLine, LogSource};
use crate::incident::IncidentEvent;

/// Default Loki service URL (internal Kubernetes DNS)
const DEFAULT_LOKI_URL: &str = "http://loki.logging.svc.cluster.local:3100";

/// Minutes of logs fetched before the incident timestamp.
const WINDOW_BEFORE_MINS: i64 = 10;
/// Minutes of logs fetched after the incident timestamp.
const WINDOW_AFTER_MINS: i64 = 1;

/// Configuration for the Loki collector.
#[derive(Debug, Clone)]
pub struct LokiConfig {
    /// Base URL for the Loki API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum number of log lines to return per query
    pub limit: u32,
    /// Whether log collection is enabled
    pub enabled: bool,
}

impl Default for LokiConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("LOKI_URL").unwrap_or_else(|_| DEFAULT_LOKI_URL.to_string()),
            timeout_secs: 10,
            limit: 200,
            enabled: !std::env::var("LOKI_DISABLED")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Loki query response structure
#[derive(Debug, Deserialize)]
struct LokiResponse {
    status: String,
    data: LokiData,
}

#[derive(Debug, Deserialize)]
struct LokiData {
    result: Vec<LokiStream>,
}

#[derive(Debug, Deserialize)]
struct LokiStream {
    values: Vec<(String, String)>, // (timestamp_ns, line)
}

/// Collector that queries Grafana Loki.
#[derive(Debug, Clone)]
pub struct LokiClient {
    config: LokiConfig,
    client: reqwest::Client,
}

impl LokiClient {
    #[must_use]
    pub fn new(config: LokiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(LokiConfig::default())
    }

    /// Execute a `LogQL` range query.
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LogLine>> {
        let start_ns = start.timestamp_nanos_opt().unwrap_or(0);
        let end_ns = end.timestamp_nanos_opt().unwrap_or(0);

        let url = format!(
            "{}/loki/api/v1/query_range",
            self.config.base_url.trim_end_matches('/')
        );

        debug!(query = %query, start = %start, end = %end, "Querying Loki");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("start", &start_ns.to_string()),
                ("end", &end_ns.to_string()),
                ("limit", &self.config.limit.to_string()),
                ("direction", "backward"), // Most recent first
            ])
            .send()
            .await
            .context("Failed to send request to Loki")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Loki query failed with status {status}: {body}");
        }

        let loki_response: LokiResponse = response
            .json()
            .await
            .context("Failed to parse Loki response")?;

        if loki_response.status != "success" {
            anyhow::bail!("Loki query returned status: {}", loki_response.status);
        }

        let mut lines = parse_streams(loki_response.data.result);
        lines.sort_by_key(|l| l.timestamp);

        debug!(lines = lines.len(), "Retrieved log lines from Loki");
        Ok(lines)
    }
}

/// Parse Loki streams into log lines. Entries with unparseable timestamps
/// are skipped.
fn parse_streams(streams: Vec<LokiStream>) -> Vec<LogLine> {
    let mut lines = Vec::new();
    for stream in streams {
        for (timestamp_ns, line) in stream.values {
            if let Ok(ns) = timestamp_ns.parse::<i64>() {
                let secs = ns / 1_000_000_000;
                let nsecs = (ns % 1_000_000_000) as u32;
                if let Some(dt) = DateTime::from_timestamp(secs, nsecs) {
                    lines.push(LogLine {
                        timestamp: dt,
                        line,
                    });
                }
            }
        }
    }
    lines
}

#[async_trait]
impl LogSource for LokiClient {
    fn enabled(&self) -> bool {
        self.config.enabled
    }

    async fn collect(&self, incident: &IncidentEvent) -> Result<Vec<LogLine>> {
        let query = format!(
            r#"{{namespace="{}", pod="{}"}}"#,
            incident.namespace, incident.subject
        );
        let start = incident.observed_at - ChronoDuration::minutes(WINDOW_BEFORE_MINS);
        let end = incident.observed_at + ChronoDuration::minutes(WINDOW_AFTER_MINS);

        self.query_range(&query, start, end).await
    }
}
