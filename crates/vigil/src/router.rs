//! Notification routing and escalation policy.

use std::collections::HashSet;
use std::sync::Arc;

use notify::{Alert, NotifyChannel, Severity};
use tracing::{debug, error, info};

use crate::context::IncidentContext;
use crate::incident::IncidentEvent;
use crate::risk::RiskVerdict;

/// Which reasons escalate beyond the chat channel.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    critical_reasons: HashSet<String>,
}

/// The escalation computed for one incident.
#[derive(Debug, Clone)]
pub struct EscalationDecision {
    pub page: bool,
    /// Names of the paging channels that will be invoked.
    pub channels: Vec<String>,
}

impl EscalationPolicy {
    #[must_use]
    pub fn new(critical_reasons: HashSet<String>) -> Self {
        Self { critical_reasons }
    }

    /// Decide whether an incident with this reason pages.
    #[must_use]
    pub fn decide(&self, reason: &str, pager: &[Arc<dyn NotifyChannel>]) -> EscalationDecision {
        let page = self.critical_reasons.contains(reason);
        let channels = if page {
            pager
                .iter()
                .filter(|c| c.enabled())
                .map(|c| c.name().to_string())
                .collect()
        } else {
            Vec::new()
        };

        EscalationDecision { page, channels }
    }
}

/// Formats and dispatches incident summaries to chat and paging channels.
///
/// Channel sends are independent: a failure on one channel is logged and
/// never blocks the others, and nothing here retries.
pub struct NotificationRouter {
    chat: Vec<Arc<dyn NotifyChannel>>,
    pager: Vec<Arc<dyn NotifyChannel>>,
    policy: EscalationPolicy,
    dashboard_url: Option<String>,
}

impl NotificationRouter {
    #[must_use]
    pub fn new(
        chat: Vec<Arc<dyn NotifyChannel>>,
        pager: Vec<Arc<dyn NotifyChannel>>,
        policy: EscalationPolicy,
        dashboard_url: Option<String>,
    ) -> Self {
        Self {
            chat,
            pager,
            policy,
            dashboard_url,
        }
    }

    /// Compose one summary and deliver it: always to chat, and to paging when
    /// the escalation policy says so.
    pub async fn notify(
        &self,
        incident: &IncidentEvent,
        context: &IncidentContext,
        verdict: &RiskVerdict,
    ) {
        let decision = self.policy.decide(&incident.reason, &self.pager);
        let alert = self.compose(incident, context, verdict, &decision);

        info!(
            correlation_key = %alert.correlation_key,
            page = decision.page,
            "Routing incident notification"
        );

        self.dispatch(&self.chat, &alert).await;

        if decision.page {
            self.dispatch(&self.pager, &alert).await;
        }
    }

    async fn dispatch(&self, channels: &[Arc<dyn NotifyChannel>], alert: &Alert) {
        for channel in channels {
            if !channel.enabled() {
                debug!(channel = channel.name(), "Channel disabled, skipping");
                continue;
            }

            match channel.send(alert).await {
                Ok(()) => debug!(channel = channel.name(), "Notification sent"),
                Err(e) => error!(
                    channel = channel.name(),
                    correlation_key = %alert.correlation_key,
                    error = %e,
                    "Failed to send notification"
                ),
            }
        }
    }

    fn compose(
        &self,
        incident: &IncidentEvent,
        context: &IncidentContext,
        verdict: &RiskVerdict,
        decision: &EscalationDecision,
    ) -> Alert {
        let severity = if decision.page {
            Severity::Critical
        } else {
            Severity::Warning
        };

        let mut body = format!(
            "{}\n\nRisk assessment: {}",
            incident.message, verdict.summary
        );
        if !verdict.available {
            body.push_str(" (assessor unavailable)");
        }

        let evidence = format!(
            "logs: {}, commits: {}, changed files: {}",
            slice_note(&context.logs),
            slice_note(&context.commits),
            slice_note(&context.diff),
        );

        Alert {
            title: format!(
                "{}: {}/{}",
                incident.reason, incident.namespace, incident.subject
            ),
            body,
            severity,
            correlation_key: incident.correlation_key(),
            fields: vec![
                ("Namespace".to_string(), incident.namespace.clone()),
                ("Subject".to_string(), incident.subject.clone()),
                ("Reason".to_string(), incident.reason.clone()),
                ("Evidence".to_string(), evidence),
            ],
            dashboard_url: self.dashboard_url.clone(),
            timestamp: incident.observed_at,
        }
    }
}

fn slice_note<T>(slice: &crate::context::ContextSlice<T>) -> String {
    if slice.collected {
        slice.items.len().to_string()
    } else {
        format!(
            "unavailable ({})",
            slice.error.as_deref().unwrap_or("unknown")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSlice;
    use crate::incident::IncidentKind;
    use async_trait::async_trait;
    use chrono::Utc;
    use notify::ChannelError;
    use std::sync::Mutex;

    struct RecordingChannel {
        channel_name: &'static str,
        enabled: bool,
        fail: bool,
        sent: Mutex<Vec<Alert>>,
    }

    impl RecordingChannel {
        fn new(channel_name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                channel_name,
                enabled: true,
                fail: false,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn failing(channel_name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                channel_name,
                enabled: true,
                fail: true,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn disabled(channel_name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                channel_name,
                enabled: false,
                fail: false,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NotifyChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            self.channel_name
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
            if self.fail {
                return Err(ChannelError::NotConfigured("boom".to_string()));
            }
            self.sent.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn incident(reason: &str) -> IncidentEvent {
        IncidentEvent {
            kind: IncidentKind::ClusterWarning,
            namespace: "payments-billing".to_string(),
            subject: "billing-api-7895-xyz".to_string(),
            reason: reason.to_string(),
            message: "Back-off restarting failed container".to_string(),
            observed_at: Utc::now(),
        }
    }

    fn context() -> IncidentContext {
        IncidentContext {
            logs: ContextSlice::collected(vec![]),
            commits: ContextSlice::collected(vec![]),
            diff: ContextSlice::collected(vec![]),
        }
    }

    fn verdict() -> RiskVerdict {
        RiskVerdict {
            summary: "Likely bad deploy, risk 8/10".to_string(),
            available: true,
        }
    }

    fn policy() -> EscalationPolicy {
        EscalationPolicy::new(["CrashLoopBackOff".to_string()].into_iter().collect())
    }

    #[tokio::test]
    async fn test_critical_reason_pages_and_chats() {
        let chat = RecordingChannel::new("slack");
        let pager = RecordingChannel::new("pagerduty");
        let router = NotificationRouter::new(
            vec![chat.clone()],
            vec![pager.clone()],
            policy(),
            None,
        );

        router
            .notify(&incident("CrashLoopBackOff"), &context(), &verdict())
            .await;

        assert_eq!(chat.sent_count(), 1);
        assert_eq!(pager.sent_count(), 1);

        let sent = chat.sent.lock().unwrap();
        assert!(sent[0].title.contains("billing-api-7895-xyz"));
        assert!(sent[0].body.contains("Likely bad deploy"));
        assert_eq!(sent[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_noncritical_reason_chats_only() {
        let chat = RecordingChannel::new("slack");
        let pager = RecordingChannel::new("pagerduty");
        let router = NotificationRouter::new(
            vec![chat.clone()],
            vec![pager.clone()],
            policy(),
            None,
        );

        router
            .notify(&incident("Unhealthy"), &context(), &verdict())
            .await;

        assert_eq!(chat.sent_count(), 1);
        assert_eq!(pager.sent_count(), 0);

        let sent = chat.sent.lock().unwrap();
        assert_eq!(sent[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_chat_failure_does_not_block_paging() {
        let chat = RecordingChannel::failing("slack");
        let pager = RecordingChannel::new("pagerduty");
        let router = NotificationRouter::new(
            vec![chat.clone()],
            vec![pager.clone()],
            policy(),
            None,
        );

        router
            .notify(&incident("CrashLoopBackOff"), &context(), &verdict())
            .await;

        assert_eq!(chat.sent_count(), 0);
        assert_eq!(pager.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_channels_are_skipped() {
        let chat = RecordingChannel::disabled("slack");
        let router = NotificationRouter::new(vec![chat.clone()], vec![], policy(), None);

        router
            .notify(&incident("CrashLoopBackOff"), &context(), &verdict())
            .await;

        assert_eq!(chat.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_verdict_is_flagged() {
        let chat = RecordingChannel::new("slack");
        let router = NotificationRouter::new(vec![chat.clone()], vec![], policy(), None);

        let fallback = RiskVerdict {
            summary: "Risk assessment unavailable.".to_string(),
            available: false,
        };
        router
            .notify(&incident("Unhealthy"), &context(), &fallback)
            .await;

        let sent = chat.sent.lock().unwrap();
        assert!(sent[0].body.contains("assessor unavailable"));
    }

    #[test]
    fn test_escalation_decision_lists_enabled_pagers() {
        let pager: Vec<Arc<dyn NotifyChannel>> = vec![
            RecordingChannel::new("pagerduty"),
            RecordingChannel::disabled("backup-pager"),
        ];

        let decision = policy().decide("CrashLoopBackOff", &pager);
        assert!(decision.page);
        assert_eq!(decision.channels, vec!["pagerduty".to_string()]);

        let decision = policy().decide("Unhealthy", &pager);
        assert!(!decision.page);
        assert!(decision.channels.is_empty());
    }
}
