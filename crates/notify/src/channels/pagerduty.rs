//! PagerDuty incident-creation channel.
//!
//! Creates an incident on a PagerDuty service through the REST API. Used as
//! the paging target when an alert escalates beyond chat.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::alert::Alert;
use crate::error::ChannelError;
use crate::NotifyChannel;

const PAGERDUTY_API_URL: &str = "https://api.pagerduty.com/incidents";

/// Environment variable for the PagerDuty REST API token.
const ENV_PAGERDUTY_API_KEY: &str = "PAGERDUTY_API_KEY";
/// Environment variable for the target service id.
const ENV_PAGERDUTY_SERVICE_ID: &str = "PAGERDUTY_SERVICE_ID";
/// Environment variable for the `From:` requester email (required by some
/// PagerDuty accounts).
const ENV_PAGERDUTY_FROM: &str = "PAGERDUTY_FROM";

/// Request timeout for incident creation.
const SEND_TIMEOUT_SECS: u64 = 10;

/// PagerDuty incident-creation channel.
pub struct PagerdutyChannel {
    api_key: Option<String>,
    service_id: Option<String>,
    from: Option<String>,
    api_url: String,
    client: reqwest::Client,
}

impl PagerdutyChannel {
    /// Create a new PagerDuty channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let api_key = std::env::var(ENV_PAGERDUTY_API_KEY)
            .ok()
            .filter(|s| !s.is_empty());
        let service_id = std::env::var(ENV_PAGERDUTY_SERVICE_ID)
            .ok()
            .filter(|s| !s.is_empty());
        let from = std::env::var(ENV_PAGERDUTY_FROM).ok().filter(|s| !s.is_empty());

        if api_key.is_some() && service_id.is_some() {
            debug!("PagerDuty paging enabled");
        } else {
            debug!("PagerDuty paging disabled (PAGERDUTY_API_KEY / PAGERDUTY_SERVICE_ID not set)");
        }

        Self::with_credentials(api_key, service_id, from, PAGERDUTY_API_URL.to_string())
    }

    /// Create a PagerDuty channel with explicit credentials.
    #[must_use]
    pub fn new(api_key: String, service_id: String, from: Option<String>) -> Self {
        Self::with_credentials(
            Some(api_key),
            Some(service_id),
            from,
            PAGERDUTY_API_URL.to_string(),
        )
    }

    fn with_credentials(
        api_key: Option<String>,
        service_id: Option<String>,
        from: Option<String>,
        api_url: String,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            service_id,
            from,
            api_url,
            client,
        }
    }

    fn format_payload(alert: &Alert, service_id: &str) -> CreateIncidentRequest {
        let mut details = alert.body.clone();
        if let Some(url) = &alert.dashboard_url {
            details.push_str(&format!("\n\nDashboard: {url}"));
        }
        details.push_str(&format!("\nCorrelation: {}", alert.correlation_key));

        CreateIncidentRequest {
            incident: IncidentPayload {
                r#type: "incident".to_string(),
                title: alert.title.clone(),
                service: ServiceReference {
                    id: service_id.to_string(),
                    r#type: "service_reference".to_string(),
                },
                body: IncidentBody {
                    r#type: "incident_body".to_string(),
                    details,
                },
            },
        }
    }
}

#[async_trait]
impl NotifyChannel for PagerdutyChannel {
    fn name(&self) -> &'static str {
        "pagerduty"
    }

    fn enabled(&self) -> bool {
        self.api_key.is_some() && self.service_id.is_some()
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("PAGERDUTY_API_KEY".to_string()))?;
        let service_id = self
            .service_id
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("PAGERDUTY_SERVICE_ID".to_string()))?;

        let payload = Self::format_payload(alert, service_id);

        debug!(channel = "pagerduty", title = %alert.title, "Creating incident");

        let mut request = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Token token={api_key}"))
            .header("Content-Type", "application/json");

        if let Some(from) = &self.from {
            request = request.header("From", from);
        }

        let response = request.json(&payload).send().await?;

        if response.status().is_success() {
            // The created-incident ack is intentionally ignored.
            let created: Option<CreateIncidentResponse> = response.json().await.ok();
            debug!(
                channel = "pagerduty",
                incident_id = created
                    .as_ref()
                    .map(|c| c.incident.id.as_str())
                    .unwrap_or("unknown"),
                "Incident created"
            );
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "pagerduty",
                status = %status,
                body = %body,
                "PagerDuty incident creation failed"
            );

            Err(ChannelError::Rejected {
                service: "pagerduty",
                status: status.as_u16(),
                body,
            })
        }
    }
}

// =============================================================================
// PagerDuty API types
// =============================================================================

#[derive(Debug, Serialize)]
struct CreateIncidentRequest {
    incident: IncidentPayload,
}

#[derive(Debug, Serialize)]
struct IncidentPayload {
    r#type: String,
    title: String,
    service: ServiceReference,
    body: IncidentBody,
}

#[derive(Debug, Serialize)]
struct ServiceReference {
    id: String,
    r#type: String,
}

#[derive(Debug, Serialize)]
struct IncidentBody {
    r#type: String,
    details: String,
}

#[derive(Debug, Deserialize)]
struct CreateIncidentResponse {
    incident: CreatedIncident,
}

#[derive(Debug, Deserialize)]
struct CreatedIncident {
    id: String,
}
