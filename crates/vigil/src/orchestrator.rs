//! Incident pipeline coordination.
//!
//! Each admitted incident runs as its own task: context fan-out, then risk
//! assessment, then notification. A slow or stuck pipeline never blocks
//! event intake, and per-key deduplication keeps alert storms down to one
//! pipeline per failing workload.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::context::{
    CommitSummary, ContextSlice, FileChange, HistorySource, IncidentContext, LogLine, LogSource,
};
use crate::dedup::{Admission, DedupTable, PipelineGuard};
use crate::incident::IncidentEvent;
use crate::risk::RiskScorer;
use crate::router::NotificationRouter;

/// Top-level coordinator for incident handling. Cheap to clone; clones share
/// the same dedup table and task tracker.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    logs: Arc<dyn LogSource>,
    history: Arc<dyn HistorySource>,
    assessor: Arc<dyn RiskScorer>,
    router: NotificationRouter,
    dedup: DedupTable,
    collector_timeout: Duration,
    tracker: TaskTracker,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        logs: Arc<dyn LogSource>,
        history: Arc<dyn HistorySource>,
        assessor: Arc<dyn RiskScorer>,
        router: NotificationRouter,
        config: &AgentConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                logs,
                history,
                assessor,
                router,
                dedup: DedupTable::new(config.dedup_window),
                collector_timeout: config.collector_timeout,
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Accept one incident.
    ///
    /// Fast and non-blocking so it can be called from the watcher's read
    /// loop: duplicates are suppressed here, admitted incidents are handed to
    /// an independently scheduled pipeline task.
    pub fn handle(&self, incident: IncidentEvent) {
        let key = incident.correlation_key();

        match self.inner.dedup.admit(&key) {
            Admission::Suppressed { duplicates } => {
                debug!(
                    correlation_key = %key,
                    duplicates,
                    "Incident suppressed as duplicate"
                );
            }
            Admission::Admitted(guard) => {
                let inner = Arc::clone(&self.inner);
                self.inner.tracker.spawn(async move {
                    inner.run_pipeline(incident, guard).await;
                });
            }
        }
    }

    /// Total incidents suppressed as duplicates since startup.
    pub fn suppressed_total(&self) -> u64 {
        self.inner.dedup.suppressed_total()
    }

    /// Wait for all in-flight pipelines to finish (best-effort drain on
    /// shutdown; pipelines are never hard-killed).
    pub async fn drain(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    #[cfg(test)]
    async fn gather_context(&self, incident: &IncidentEvent) -> IncidentContext {
        self.inner.gather_context(incident).await
    }
}

impl Inner {
    async fn run_pipeline(&self, incident: IncidentEvent, guard: PipelineGuard) {
        let key = incident.correlation_key();
        info!(
            correlation_key = %key,
            reason = %incident.reason,
            "Handling incident"
        );

        // Collectors fan out in parallel; everything after runs strictly in
        // order once all of them have settled.
        let context = self.gather_context(&incident).await;
        let verdict = self.assessor.assess(&incident, &context).await;
        self.router.notify(&incident, &context, &verdict).await;

        info!(correlation_key = %key, "Incident pipeline complete");
        guard.complete();
    }

    async fn gather_context(&self, incident: &IncidentEvent) -> IncidentContext {
        let (logs, (commits, diff)) = tokio::join!(
            self.collect_logs(incident),
            self.collect_history(incident),
        );

        IncidentContext {
            logs,
            commits,
            diff,
        }
    }

    async fn collect_logs(&self, incident: &IncidentEvent) -> ContextSlice<LogLine> {
        if !self.logs.enabled() {
            return ContextSlice::failed("disabled");
        }

        match timeout(self.collector_timeout, self.logs.collect(incident)).await {
            Ok(Ok(items)) => ContextSlice::collected(items),
            Ok(Err(e)) => {
                warn!(
                    correlation_key = %incident.correlation_key(),
                    collector = "logs",
                    error = %e,
                    "Context collector failed"
                );
                ContextSlice::failed(e.to_string())
            }
            Err(_) => {
                warn!(
                    correlation_key = %incident.correlation_key(),
                    collector = "logs",
                    timeout = ?self.collector_timeout,
                    "Context collector timed out"
                );
                ContextSlice::failed(format!(
                    "timed out after {}s",
                    self.collector_timeout.as_secs()
                ))
            }
        }
    }

    async fn collect_history(
        &self,
        incident: &IncidentEvent,
    ) -> (ContextSlice<CommitSummary>, ContextSlice<FileChange>) {
        if !self.history.enabled() {
            return (
                ContextSlice::failed("disabled"),
                ContextSlice::failed("disabled"),
            );
        }

        match timeout(self.collector_timeout, self.history.collect(incident)).await {
            Ok(Ok(history)) => {
                let diff = match history.diff_error {
                    None => ContextSlice::collected(history.diff),
                    Some(reason) => ContextSlice::failed(reason),
                };
                (ContextSlice::collected(history.commits), diff)
            }
            Ok(Err(e)) => {
                warn!(
                    correlation_key = %incident.correlation_key(),
                    collector = "history",
                    error = %e,
                    "Context collector failed"
                );
                let reason = e.to_string();
                (
                    ContextSlice::failed(reason.clone()),
                    ContextSlice::failed(reason),
                )
            }
            Err(_) => {
                warn!(
                    correlation_key = %incident.correlation_key(),
                    collector = "history",
                    timeout = ?self.collector_timeout,
                    "Context collector timed out"
                );
                let reason = format!("timed out after {}s", self.collector_timeout.as_secs());
                (
                    ContextSlice::failed(reason.clone()),
                    ContextSlice::failed(reason),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RecentHistory;
    use crate::incident::IncidentKind;
    use crate::risk::RiskVerdict;
    use crate::router::EscalationPolicy;
    use async_trait::async_trait;
    use chrono::Utc;

    struct SlowLogs;

    #[async_trait]
    impl LogSource for SlowLogs {
        fn enabled(&self) -> bool {
            true
        }

        async fn collect(&self, _incident: &IncidentEvent) -> anyhow::Result<Vec<LogLine>> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(vec![])
        }
    }

    struct FakeHistory;

    #[async_trait]
    impl HistorySource for FakeHistory {
        fn enabled(&self) -> bool {
            true
        }

        async fn collect(&self, _incident: &IncidentEvent) -> anyhow::Result<RecentHistory> {
            Ok(RecentHistory {
                commits: vec![CommitSummary {
                    sha: "abc123".to_string(),
                    message: "Bump billing engine".to_string(),
                    author: "dev".to_string(),
                }],
                diff: vec![],
                diff_error: None,
            })
        }
    }

    struct FakeScorer;

    #[async_trait]
    impl RiskScorer for FakeScorer {
        async fn assess(
            &self,
            _incident: &IncidentEvent,
            _context: &IncidentContext,
        ) -> RiskVerdict {
            RiskVerdict {
                summary: "low risk".to_string(),
                available: true,
            }
        }
    }

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

    fn orchestrator(collector_timeout: Duration) -> Orchestrator {
        let config = AgentConfig {
            collector_timeout,
            ..AgentConfig::default()
        };
        Orchestrator::new(
            Arc::new(SlowLogs),
            Arc::new(FakeHistory),
            Arc::new(FakeScorer),
            NotificationRouter::new(
                vec![],
                vec![],
                EscalationPolicy::new(std::collections::HashSet::new()),
                None,
            ),
            &config,
        )
    }

    #[tokio::test]
    async fn test_collector_timeout_degrades_only_its_slice() {
        let orch = orchestrator(Duration::from_millis(20));
        let context = orch.gather_context(&incident()).await;

        assert!(!context.logs.collected);
        assert!(context
            .logs
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));
        assert!(context.commits.collected);
        assert_eq!(context.commits.items.len(), 1);
        assert!(context.diff.collected);
    }

    #[tokio::test]
    async fn test_duplicate_incident_is_suppressed_while_in_flight() {
        let orch = orchestrator(Duration::from_millis(300));

        orch.handle(incident());
        orch.handle(incident());

        orch.drain().await;
        assert_eq!(orch.suppressed_total(), 1);
    }
}
