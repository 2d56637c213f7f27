//! Incident types and raw-event normalization.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Origin of an incident signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// Detected on the cluster event feed.
    ClusterWarning,
    /// Injected through the manual entry point.
    ManualInjection,
}

/// A normalized failure signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub kind: IncidentKind,
    pub namespace: String,
    /// Name of the failing object, typically a pod or workload.
    pub subject: String,
    pub reason: String,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

impl IncidentEvent {
    /// Deduplication identity: stable for logically-identical repeated
    /// signals for the same failing workload.
    #[must_use]
    pub fn correlation_key(&self) -> String {
        format!("{}/{}:{}", self.namespace, self.subject, self.reason)
    }
}

/// Maps raw cluster events into [`IncidentEvent`]s.
///
/// The normalizer never fails: records that don't qualify produce `None`, and
/// records too malformed to identify (no subject and no namespace) are
/// dropped and counted.
pub struct Normalizer {
    failure_reasons: HashSet<String>,
    dropped: AtomicU64,
}

impl Normalizer {
    #[must_use]
    pub fn new(failure_reasons: HashSet<String>) -> Self {
        Self {
            failure_reasons,
            dropped: AtomicU64::new(0),
        }
    }

    /// Normalize a raw feed record.
    ///
    /// Returns `None` for records filtered out (severity is not `Warning`,
    /// reason outside the failure-reason set) and for unidentifiable records,
    /// which are additionally counted in [`Normalizer::dropped_total`].
    pub fn normalize(&self, raw: &Event) -> Option<IncidentEvent> {
        let severity = raw.type_.as_deref().unwrap_or_default();
        if severity != "Warning" {
            return None;
        }

        let reason = raw.reason.as_deref().unwrap_or_default();
        if !self.failure_reasons.contains(reason) {
            return None;
        }

        let subject = raw
            .involved_object
            .name
            .clone()
            .unwrap_or_default();
        let namespace = raw
            .involved_object
            .namespace
            .clone()
            .or_else(|| raw.metadata.namespace.clone())
            .unwrap_or_default();

        if subject.is_empty() && namespace.is_empty() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(reason = %reason, "Dropping unidentifiable event record");
            return None;
        }

        let observed_at = raw
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| raw.event_time.as_ref().map(|t| t.0))
            .unwrap_or_else(Utc::now);

        Some(IncidentEvent {
            kind: IncidentKind::ClusterWarning,
            namespace,
            subject,
            reason: reason.to_string(),
            message: raw.message.clone().unwrap_or_default(),
            observed_at,
        })
    }

    /// Number of records dropped as unidentifiable.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn normalizer() -> Normalizer {
        Normalizer::new(
            ["Failed", "BackOff", "Unhealthy", "FailedScheduling", "CrashLoopBackOff"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        )
    }

    fn raw_event(type_: &str, reason: &str, namespace: &str, name: &str) -> Event {
        Event {
            type_: Some(type_.to_string()),
            reason: Some(reason.to_string()),
            message: Some("Back-off restarting failed container".to_string()),
            involved_object: ObjectReference {
                namespace: Some(namespace.to_string()).filter(|s| !s.is_empty()),
                name: Some(name.to_string()).filter(|s| !s.is_empty()),
                kind: Some("Pod".to_string()),
                ..Default::default()
            },
            last_timestamp: Some(Time(Utc::now())),
            ..Default::default()
        }
    }

    #[test]
    fn test_normal_events_are_filtered() {
        let n = normalizer();
        assert!(n
            .normalize(&raw_event("Normal", "Scheduled", "payments", "api-1"))
            .is_none());
        assert_eq!(n.dropped_total(), 0);
    }

    #[test]
    fn test_unknown_reasons_are_filtered() {
        let n = normalizer();
        assert!(n
            .normalize(&raw_event("Warning", "NodePressure", "payments", "api-1"))
            .is_none());
        assert_eq!(n.dropped_total(), 0);
    }

    #[test]
    fn test_warning_event_is_normalized() {
        let n = normalizer();
        let incident = n
            .normalize(&raw_event(
                "Warning",
                "CrashLoopBackOff",
                "payments-billing",
                "billing-api-7895-xyz",
            ))
            .expect("should normalize");

        assert_eq!(incident.kind, IncidentKind::ClusterWarning);
        assert_eq!(incident.namespace, "payments-billing");
        assert_eq!(incident.subject, "billing-api-7895-xyz");
        assert_eq!(incident.reason, "CrashLoopBackOff");
        assert_eq!(
            incident.correlation_key(),
            "payments-billing/billing-api-7895-xyz:CrashLoopBackOff"
        );
    }

    #[test]
    fn test_correlation_key_is_stable() {
        let n = normalizer();
        let raw = raw_event("Warning", "BackOff", "payments", "api-1");
        let a = n.normalize(&raw).unwrap();
        let b = n.normalize(&raw).unwrap();
        assert_eq!(a.correlation_key(), b.correlation_key());
    }

    #[test]
    fn test_unidentifiable_records_are_dropped_and_counted() {
        let n = normalizer();
        let mut raw = raw_event("Warning", "Failed", "", "");
        raw.metadata.namespace = None;

        assert!(n.normalize(&raw).is_none());
        assert!(n.normalize(&raw).is_none());
        assert_eq!(n.dropped_total(), 2);
    }

    #[test]
    fn test_missing_fields_map_to_empty_strings() {
        let n = normalizer();
        let raw = Event {
            type_: Some("Warning".to_string()),
            reason: Some("Failed".to_string()),
            message: None,
            involved_object: ObjectReference {
                name: Some("job-runner-1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let incident = n.normalize(&raw).expect("identifiable by subject");
        assert_eq!(incident.namespace, "");
        assert_eq!(incident.message, "");
    }
}
