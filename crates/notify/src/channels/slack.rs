//! Slack webhook notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::alert::Alert;
use crate::error::ChannelError;
use crate::NotifyChannel;

/// Environment variable for Slack webhook URL.
const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";

/// Request timeout for webhook deliveries.
const SEND_TIMEOUT_SECS: u64 = 10;

/// Slack webhook notification channel.
pub struct SlackChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a new Slack channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let webhook_url = std::env::var(ENV_SLACK_WEBHOOK_URL)
            .ok()
            .filter(|s| !s.is_empty());

        if webhook_url.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (SLACK_WEBHOOK_URL not set)");
        }

        Self::with_url(webhook_url)
    }

    /// Create a Slack channel with a specific webhook URL.
    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        Self::with_url(Some(webhook_url))
    }

    fn with_url(webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            webhook_url,
            client,
        }
    }

    /// Format an alert as a Slack webhook payload.
    fn format_payload(alert: &Alert) -> SlackPayload {
        let mut fields: Vec<SlackField> = alert
            .fields
            .iter()
            .map(|(name, value)| SlackField {
                title: name.clone(),
                value: value.clone(),
                short: true,
            })
            .collect();

        fields.push(SlackField {
            title: "Correlation".to_string(),
            value: alert.correlation_key.clone(),
            short: false,
        });

        let mut text = alert.body.clone();
        if let Some(url) = &alert.dashboard_url {
            text.push_str(&format!("\n<{url}|Dashboard>"));
        }

        let attachment = SlackAttachment {
            fallback: alert.title.clone(),
            color: alert.severity.color().to_string(),
            title: alert.title.clone(),
            text,
            fields,
            footer: Some(format!(
                "{} | {}",
                alert.severity.as_str(),
                alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            ts: Some(alert.timestamp.timestamp()),
        };

        SlackPayload {
            attachments: vec![attachment],
        }
    }
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("SLACK_WEBHOOK_URL".to_string()))?;

        let payload = Self::format_payload(alert);

        debug!(channel = "slack", title = %alert.title, "Sending alert");

        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if response.status().is_success() {
            debug!(channel = "slack", "Alert sent successfully");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "slack",
                status = %status,
                body = %body,
                "Slack webhook request failed"
            );

            Err(ChannelError::Rejected {
                service: "slack",
                status: status.as_u16(),
                body,
            })
        }
    }
}

// =============================================================================
// Slack API types
// =============================================================================

#[derive(Debug, Serialize)]
struct SlackPayload {
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    fallback: String,
    color: String,
    title: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}
