//! Alert payload shared by all notification channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    Warning,
    /// Critical - immediate action required
    Critical,
}

impl Severity {
    /// Get the attachment color for this severity.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Info => "#3498db",     // Blue
            Self::Warning => "#f39c12",  // Orange
            Self::Critical => "#e74c3c", // Red
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// A composed, channel-independent incident alert.
///
/// The router builds one `Alert` per incident; each channel formats it into
/// its own wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Short headline, e.g. "CrashLoopBackOff: payments/billing-api".
    pub title: String,
    /// Human-readable body with incident details and the risk verdict.
    pub body: String,
    pub severity: Severity,
    /// Deduplication identity of the incident this alert describes.
    pub correlation_key: String,
    /// Extra key/value context rendered as structured fields where the
    /// channel supports them.
    #[serde(default)]
    pub fields: Vec<(String, String)>,
    /// Link to the relevant dashboard, if one is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_colors() {
        assert_eq!(Severity::Info.color(), "#3498db");
        assert_eq!(Severity::Warning.color(), "#f39c12");
        assert_eq!(Severity::Critical.color(), "#e74c3c");
    }

    #[test]
    fn test_alert_roundtrip() {
        let alert = Alert {
            title: "CrashLoopBackOff: payments/billing-api".to_string(),
            body: "Back-off restarting failed container".to_string(),
            severity: Severity::Critical,
            correlation_key: "payments/billing-api:CrashLoopBackOff".to_string(),
            fields: vec![("Namespace".to_string(), "payments".to_string())],
            dashboard_url: None,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&alert).unwrap();
        let back: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(back.correlation_key, alert.correlation_key);
        assert_eq!(back.severity, Severity::Critical);
    }
}
