//! Long-lived subscription to the cluster event feed.
//!
//! The watcher owns the raw watch stream so it also owns reconnection: on
//! any stream termination it backs off exponentially and re-opens the
//! subscription. A missing cluster configuration is terminal: the watcher
//! logs once and parks, it never retries credentials.

use std::time::{Duration, Instant};

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Event;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::incident::{IncidentEvent, Normalizer};

/// Server-side watch timeout. The API server closes the stream after this
/// many seconds; the loop reconnects without counting it as a failure burst.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Reconnect backoff for the event watcher.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub base: Duration,
    /// Multiplier applied per consecutive failure.
    pub factor: f64,
    /// Upper bound on the delay.
    pub cap: Duration,
    /// A connection lasting at least this long resets the failure count.
    pub stability_threshold: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(60),
            stability_threshold: Duration::from_secs(60),
        }
    }
}

/// Reconnect bookkeeping. Mutated only by the watcher's own loop.
#[derive(Debug, Default)]
pub(crate) struct ReconnectState {
    consecutive_failures: u32,
    last_connected_at: Option<Instant>,
}

impl ReconnectState {
    /// A subscription was established.
    fn record_connect(&mut self) {
        self.last_connected_at = Some(Instant::now());
    }

    /// The subscription ended. A connection that lasted past the stability
    /// threshold resets the failure count before this failure is recorded.
    fn record_disconnect(&mut self, config: &BackoffConfig) {
        if let Some(connected_at) = self.last_connected_at.take() {
            if connected_at.elapsed() >= config.stability_threshold {
                self.consecutive_failures = 0;
            }
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Current reconnect delay: exponential in the failure count, capped.
    fn delay(&self, config: &BackoffConfig) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let exponent = (self.consecutive_failures - 1).min(31) as i32;
        let delay_secs = config.base.as_secs_f64() * config.factor.powi(exponent);
        let capped = delay_secs.min(config.cap.as_secs_f64());

        Duration::from_secs_f64(capped)
    }
}

/// Owns the event-feed subscription and delivers normalized incidents.
pub struct EventWatcher {
    client: Option<Client>,
    normalizer: Normalizer,
    backoff: BackoffConfig,
    cancel: CancellationToken,
}

impl EventWatcher {
    /// Create a watcher. `client: None` means cluster credentials could not
    /// be established at all; the watcher starts in its terminal disabled
    /// state.
    #[must_use]
    pub fn new(
        client: Option<Client>,
        normalizer: Normalizer,
        backoff: BackoffConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            normalizer,
            backoff,
            cancel,
        }
    }

    /// Number of raw records dropped as unidentifiable.
    pub fn dropped_total(&self) -> u64 {
        self.normalizer.dropped_total()
    }

    /// Run the subscription loop until cancelled, delivering each qualifying
    /// warning record to `on_incident`.
    ///
    /// The callback runs on the read loop and must hand off quickly; the
    /// orchestrator's `handle` only admits and spawns.
    pub async fn watch<F>(&self, on_incident: F)
    where
        F: Fn(IncidentEvent) + Send + Sync,
    {
        let Some(client) = self.client.clone() else {
            error!(
                "Cluster credentials unavailable; event watching disabled for the process lifetime"
            );
            self.cancel.cancelled().await;
            return;
        };

        let api: Api<Event> = Api::all(client);
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let mut state = ReconnectState::default();

        loop {
            match api.watch(&params, "0").await {
                Ok(stream) => {
                    info!("Event feed connected");
                    state.record_connect();

                    let mut stream = stream.boxed();
                    loop {
                        tokio::select! {
                            () = self.cancel.cancelled() => {
                                info!("Event watcher cancelled");
                                return;
                            }
                            item = stream.try_next() => match item {
                                Ok(Some(WatchEvent::Added(raw) | WatchEvent::Modified(raw))) => {
                                    if let Some(incident) = self.normalizer.normalize(&raw) {
                                        debug!(
                                            correlation_key = %incident.correlation_key(),
                                            "Accepted warning event"
                                        );
                                        on_incident(incident);
                                    }
                                }
                                Ok(Some(WatchEvent::Error(status))) => {
                                    warn!(
                                        code = status.code,
                                        message = %status.message,
                                        "Event feed returned error status"
                                    );
                                    break;
                                }
                                Ok(Some(_)) => {} // Deleted / Bookmark
                                Ok(None) => {
                                    debug!("Event feed stream ended");
                                    break;
                                }
                                Err(e) => {
                                    warn!(error = %e, "Event feed read failed");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to open event feed");
                }
            }

            state.record_disconnect(&self.backoff);
            let delay = state.delay(&self.backoff);
            warn!(
                consecutive_failures = state.consecutive_failures,
                delay_secs = delay.as_secs(),
                "Event feed disconnected, reconnecting after backoff"
            );

            // Reconnects replay from resource version 0; the dedup table
            // absorbs replayed warning events.
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("Event watcher cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Deliver a pre-built incident directly, bypassing feed and filter.
    /// Entry point for operational testing.
    pub fn inject_manual<F>(&self, event: IncidentEvent, on_incident: F)
    where
        F: Fn(IncidentEvent),
    {
        info!(
            correlation_key = %event.correlation_key(),
            "Manually injected incident"
        );
        on_incident(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig::default()
    }

    #[test]
    fn test_backoff_is_monotonic_up_to_cap() {
        let config = config();
        let mut state = ReconnectState::default();
        let mut previous = Duration::ZERO;

        for _ in 0..10 {
            state.record_disconnect(&config);
            let delay = state.delay(&config);
            assert!(delay >= previous, "backoff must be non-decreasing");
            assert!(delay <= config.cap);
            previous = delay;
        }

        // Past the cap the delay stays pinned there.
        assert_eq!(previous, config.cap);
    }

    #[test]
    fn test_backoff_sequence() {
        let config = config();
        let mut state = ReconnectState::default();

        let expected = [1, 2, 4, 8, 16, 32, 60, 60];
        for secs in expected {
            state.record_disconnect(&config);
            assert_eq!(state.delay(&config), Duration::from_secs(secs));
        }
    }

    #[test]
    fn test_stable_connection_resets_backoff() {
        let config = BackoffConfig {
            stability_threshold: Duration::ZERO,
            ..config()
        };
        let mut state = ReconnectState::default();

        for _ in 0..5 {
            state.record_disconnect(&config);
        }
        assert_eq!(state.delay(&config), Duration::from_secs(16));

        // Any connection satisfies a zero stability threshold.
        state.record_connect();
        state.record_disconnect(&config);
        assert_eq!(state.delay(&config), config.base);
    }

    #[test]
    fn test_short_connection_does_not_reset_backoff() {
        let config = BackoffConfig {
            stability_threshold: Duration::from_secs(3600),
            ..config()
        };
        let mut state = ReconnectState::default();

        state.record_disconnect(&config);
        state.record_disconnect(&config);

        // Flapping: connects, then drops well before the threshold.
        state.record_connect();
        state.record_disconnect(&config);
        assert_eq!(state.delay(&config), Duration::from_secs(4));
    }

    #[test]
    fn test_no_failures_means_no_delay() {
        let state = ReconnectState::default();
        assert_eq!(state.delay(&config()), Duration::ZERO);
    }
}
