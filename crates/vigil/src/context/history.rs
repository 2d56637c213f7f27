//! GitHub collector for recent deployment history.
//!
//! Fetches the most recent commits on the monitored repository plus the head
//! commit's file changes. The incident's workload is assumed to deploy from
//! the configured repository; mapping workloads to repositories is a
//! configuration concern, not something the collector infers.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{CommitSummary, FileChange, HistorySource, RecentHistory};
use crate::incident::IncidentEvent;

const GITHUB_API_URL: &str = "https://api.github.com";

/// Configuration for the history collector.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// API token; unset disables the collector.
    pub token: Option<String>,
    /// Repository in `owner/name` form; unset disables the collector.
    pub repository: Option<String>,
    /// How many recent commits to fetch.
    pub commit_limit: u32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: std::env::var("GITHUB_TOKEN").ok().filter(|s| !s.is_empty()),
            repository: std::env::var("GITHUB_REPOSITORY")
                .ok()
                .filter(|s| !s.is_empty()),
            commit_limit: 5,
            timeout_secs: 10,
        }
    }
}

/// Collector that queries the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubClient {
    config: GithubConfig,
    client: reqwest::Client,
}

impl GithubClient {
    #[must_use]
    pub fn new(config: GithubConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("vigil/0.3"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(GithubConfig::default())
    }

    /// Fetch the most recent commits on the default branch.
    pub async fn recent_commits(&self, limit: u32) -> Result<Vec<CommitSummary>> {
        let repo = self.repository()?;
        let url = format!("{GITHUB_API_URL}/repos/{repo}/commits");

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.auth_header()?)
            .query(&[("per_page", limit.to_string())])
            .send()
            .await
            .context("Failed to fetch recent commits")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GitHub API error listing commits: {status} - {body}"));
        }

        let commits: Vec<RawCommit> = response
            .json()
            .await
            .context("Failed to parse commit list response")?;

        Ok(commits.into_iter().map(RawCommit::into_summary).collect())
    }

    /// Fetch the file-change list for one commit.
    pub async fn commit_diff(&self, sha: &str) -> Result<Vec<FileChange>> {
        let repo = self.repository()?;
        let url = format!("{GITHUB_API_URL}/repos/{repo}/commits/{sha}");

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.auth_header()?)
            .send()
            .await
            .context("Failed to fetch commit diff")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GitHub API error fetching commit: {status} - {body}"));
        }

        let detail: RawCommitDetail = response
            .json()
            .await
            .context("Failed to parse commit detail response")?;

        Ok(detail
            .files
            .unwrap_or_default()
            .into_iter()
            .map(RawFile::into_change)
            .collect())
    }

    fn repository(&self) -> Result<&str> {
        self.config
            .repository
            .as_deref()
            .ok_or_else(|| anyhow!("GITHUB_REPOSITORY is not configured"))
    }

    fn auth_header(&self) -> Result<String> {
        self.config
            .token
            .as_deref()
            .map(|t| format!("Bearer {t}"))
            .ok_or_else(|| anyhow!("GITHUB_TOKEN is not configured"))
    }
}

#[async_trait]
impl HistorySource for GithubClient {
    fn enabled(&self) -> bool {
        self.config.token.is_some() && self.config.repository.is_some()
    }

    async fn collect(&self, incident: &IncidentEvent) -> Result<RecentHistory> {
        let commits = self.recent_commits(self.config.commit_limit).await?;

        // The head commit's changes are the most likely culprit; a diff
        // failure degrades only the diff slice.
        let (diff, diff_error) = match commits.first() {
            Some(head) => match self.commit_diff(&head.sha).await {
                Ok(diff) => (diff, None),
                Err(e) => {
                    warn!(
                        correlation_key = %incident.correlation_key(),
                        sha = %head.sha,
                        error = %e,
                        "Failed to fetch commit diff"
                    );
                    (Vec::new(), Some(e.to_string()))
                }
            },
            None => (Vec::new(), None),
        };

        debug!(
            commits = commits.len(),
            changed_files = diff.len(),
            "Retrieved deployment history"
        );

        Ok(RecentHistory {
            commits,
            diff,
            diff_error,
        })
    }
}

// =============================================================================
// GitHub API types
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawCommit {
    sha: String,
    commit: RawCommitInner,
}

#[derive(Debug, Deserialize)]
struct RawCommitInner {
    message: String,
    author: Option<RawAuthor>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCommitDetail {
    files: Option<Vec<RawFile>>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    filename: String,
    status: String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
}

impl RawCommit {
    fn into_summary(self) -> CommitSummary {
        // Only the first line of the message is useful as a summary.
        let message = self
            .commit
            .message
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();

        CommitSummary {
            sha: self.sha,
            message,
            author: self
                .commit
                .author
                .and_then(|a| a.name)
                .unwrap_or_default(),
        }
    }
}

impl RawFile {
    fn into_change(self) -> FileChange {
        FileChange {
            filename: self.filename,
            status: self.status,
            additions: self.additions,
            deletions: self.deletions,
        }
    }
}
