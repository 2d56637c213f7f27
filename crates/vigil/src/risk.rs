//! Risk assessment via an OpenAI-compatible chat-completions endpoint.
//!
//! Builds a bounded prompt from the gathered context and asks the scoring
//! model for a short root-cause summary and risk score. Assessment is
//! best-effort: any failure yields an unavailable verdict, never an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Write as _;
use tracing::{debug, warn};

use crate::context::IncidentContext;
use crate::incident::IncidentEvent;

/// Default scoring endpoint.
const DEFAULT_RISK_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Fallback verdict text when assessment is disabled by configuration.
const VERDICT_DISABLED: &str = "Risk assessment disabled.";
/// Fallback verdict text when the scoring collaborator failed.
const VERDICT_UNAVAILABLE: &str = "Risk assessment unavailable.";

/// Output of the risk assessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub summary: String,
    /// False when the scoring collaborator failed or is disabled.
    pub available: bool,
}

impl RiskVerdict {
    fn fallback(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            available: false,
        }
    }
}

/// Scores an incident from its gathered context.
#[async_trait]
pub trait RiskScorer: Send + Sync {
    async fn assess(&self, incident: &IncidentEvent, context: &IncidentContext) -> RiskVerdict;
}

/// Configuration for the risk assessor.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// OpenAI-compatible chat-completions URL.
    pub endpoint: String,
    /// Model to use for scoring.
    pub model: String,
    /// API key; unset disables assessment.
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum characters per context field in the prompt. Longer fields are
    /// truncated silently to respect the collaborator's payload limits.
    pub max_field_chars: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            endpoint: std::env::var("RISK_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_RISK_ENDPOINT.to_string()),
            model: std::env::var("RISK_MODEL").unwrap_or_else(|_| "gpt-4-turbo".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty()),
            timeout_secs: 30,
            max_field_chars: std::env::var("RISK_MAX_FIELD_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4000),
        }
    }
}

/// Risk assessor backed by a chat-completions API.
pub struct RiskAssessor {
    config: RiskConfig,
    client: reqwest::Client,
}

impl RiskAssessor {
    #[must_use]
    pub fn new(config: RiskConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(RiskConfig::default())
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Build the scoring prompt from the incident and whatever context was
    /// collected. Each field is truncated to the configured maximum.
    fn build_prompt(&self, incident: &IncidentEvent, context: &IncidentContext) -> String {
        let max = self.config.max_field_chars;
        let mut prompt = String::new();

        let _ = writeln!(
            prompt,
            "Analyze the following deployment failure for risk and likely root cause.\n"
        );
        let _ = writeln!(
            prompt,
            "Workload: {}/{}\nReason: {}\nMessage: {}\n",
            incident.namespace,
            incident.subject,
            incident.reason,
            truncate_chars(&incident.message, max),
        );

        prompt.push_str("Recent commits:\n");
        if context.commits.collected {
            if context.commits.items.is_empty() {
                prompt.push_str("(none)\n");
            }
            for commit in &context.commits.items {
                let _ = writeln!(prompt, "- {} {}", commit.sha, commit.message);
            }
        } else {
            let _ = writeln!(
                prompt,
                "(not collected: {})",
                context.commits.error.as_deref().unwrap_or("unknown")
            );
        }

        prompt.push_str("\nHead commit changes:\n");
        if context.diff.collected {
            let mut changes = String::new();
            for file in &context.diff.items {
                let _ = writeln!(
                    changes,
                    "- {} ({}, +{} -{})",
                    file.filename, file.status, file.additions, file.deletions
                );
            }
            if changes.is_empty() {
                changes.push_str("(none)\n");
            }
            prompt.push_str(&truncate_chars(&changes, max));
        } else {
            let _ = writeln!(
                prompt,
                "(not collected: {})",
                context.diff.error.as_deref().unwrap_or("unknown")
            );
        }

        prompt.push_str("\nRecent logs:\n");
        if context.logs.collected {
            let mut logs = String::new();
            for entry in &context.logs.items {
                let _ = writeln!(logs, "{}", entry.line);
            }
            if logs.is_empty() {
                logs.push_str("(none)\n");
            }
            prompt.push_str(&truncate_chars(&redact_secrets(&logs), max));
        } else {
            let _ = writeln!(
                prompt,
                "(not collected: {})",
                context.logs.error.as_deref().unwrap_or("unknown")
            );
        }

        prompt.push_str(
            "\nProvide a short summary of the likely cause and a risk score (1-10).",
        );
        prompt
    }
}

#[async_trait]
impl RiskScorer for RiskAssessor {
    async fn assess(&self, incident: &IncidentEvent, context: &IncidentContext) -> RiskVerdict {
        let Some(api_key) = self.config.api_key.as_deref() else {
            debug!("Risk assessment disabled, using fallback verdict");
            return RiskVerdict::fallback(VERDICT_DISABLED);
        };

        let prompt = self.build_prompt(incident, context);

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: 500,
            temperature: 0.2,
        };

        let response = match self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    correlation_key = %incident.correlation_key(),
                    error = %e,
                    "Risk scoring request failed"
                );
                return RiskVerdict::fallback(VERDICT_UNAVAILABLE);
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                correlation_key = %incident.correlation_key(),
                status = %status,
                body = %body,
                "Risk scoring request rejected"
            );
            return RiskVerdict::fallback(VERDICT_UNAVAILABLE);
        }

        let chat_response: ChatResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    correlation_key = %incident.correlation_key(),
                    error = %e,
                    "Failed to parse risk scoring response"
                );
                return RiskVerdict::fallback(VERDICT_UNAVAILABLE);
            }
        };

        match chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
        {
            Some(summary) => RiskVerdict {
                summary,
                available: true,
            },
            None => RiskVerdict::fallback(VERDICT_UNAVAILABLE),
        }
    }
}

// =============================================================================
// Chat API types
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// Truncate to at most `max` characters, respecting char boundaries.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

/// Redact sensitive values from log text before it leaves the cluster.
fn redact_secrets(text: &str) -> String {
    let mut result = Cow::Borrowed(text);

    let secret_patterns = [
        // API keys with known prefixes
        (r"sk-ant-[a-zA-Z0-9_-]+", "[REDACTED_ANTHROPIC_KEY]"),
        (r"sk-proj-[a-zA-Z0-9_-]+", "[REDACTED_OPENAI_KEY]"),
        (r"ghp_[a-zA-Z0-9]+", "[REDACTED_GITHUB_TOKEN]"),
        (r"xox[bap]-[a-zA-Z0-9-]+", "[REDACTED_SLACK_TOKEN]"),
        (r"AIzaSy[a-zA-Z0-9_-]+", "[REDACTED_GOOGLE_KEY]"),
        // Generic patterns for JSON secret blocks
        (r#""[A-Z_]*API_KEY":\s*"[^"]+""#, r#""API_KEY":"[REDACTED]""#),
        (r#""[A-Z_]*TOKEN":\s*"[^"]+""#, r#""TOKEN":"[REDACTED]""#),
        (r"(?i)password=\S+", "password=[REDACTED]"),
    ];

    for (pattern, replacement) in secret_patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            result = Cow::Owned(re.replace_all(&result, replacement).to_string());
        }
    }

    result.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CommitSummary, ContextSlice};
    use crate::incident::IncidentKind;
    use chrono::Utc;

    fn incident() -> IncidentEvent {
        IncidentEvent {
            kind: IncidentKind::ClusterWarning,
            namespace: "payments-billing".to_string(),
            subject: "billing-api-7895-xyz".to_string(),
            reason: "CrashLoopBackOff".to_string(),
            message: "Back-off restarting failed container".to_string(),
            observed_at: Utc::now(),
        }
    }

    fn partial_context() -> IncidentContext {
        IncidentContext {
            logs: ContextSlice::failed("timed out after 5s"),
            commits: ContextSlice::collected(vec![CommitSummary {
                sha: "abc123".to_string(),
                message: "Bump billing engine".to_string(),
                author: "dev".to_string(),
            }]),
            diff: ContextSlice::collected(vec![]),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // Multibyte characters must not be split.
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
    }

    #[test]
    fn test_redact_secrets() {
        let text = "connecting with sk-proj-abc123XYZ and ghp_deadbeef0001\npassword=hunter2";
        let redacted = redact_secrets(text);
        assert!(redacted.contains("[REDACTED_OPENAI_KEY]"));
        assert!(redacted.contains("[REDACTED_GITHUB_TOKEN]"));
        assert!(redacted.contains("password=[REDACTED]"));
        assert!(!redacted.contains("hunter2"));
    }

    #[test]
    fn test_prompt_includes_identity_and_partial_failures() {
        let assessor = RiskAssessor::new(RiskConfig {
            api_key: Some("test".to_string()),
            ..RiskConfig::default()
        });

        let prompt = assessor.build_prompt(&incident(), &partial_context());
        assert!(prompt.contains("billing-api-7895-xyz"));
        assert!(prompt.contains("CrashLoopBackOff"));
        assert!(prompt.contains("abc123 Bump billing engine"));
        assert!(prompt.contains("(not collected: timed out after 5s)"));
    }

    #[test]
    fn test_prompt_is_bounded() {
        let assessor = RiskAssessor::new(RiskConfig {
            api_key: Some("test".to_string()),
            max_field_chars: 100,
            ..RiskConfig::default()
        });

        let mut context = partial_context();
        context.logs = ContextSlice::collected(
            (0..1000)
                .map(|i| crate::context::LogLine {
                    timestamp: Utc::now(),
                    line: format!("very long log line number {i}"),
                })
                .collect(),
        );

        let prompt = assessor.build_prompt(&incident(), &context);
        // Identity plus bounded fields; far below the unbounded size.
        assert!(prompt.len() < 2000);
    }

    #[tokio::test]
    async fn test_disabled_assessor_returns_fallback() {
        let assessor = RiskAssessor::new(RiskConfig {
            api_key: None,
            ..RiskConfig::default()
        });

        let verdict = assessor.assess(&incident(), &partial_context()).await;
        assert!(!verdict.available);
        assert_eq!(verdict.summary, VERDICT_DISABLED);
    }
}
