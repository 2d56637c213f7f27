//! Cluster incident-response agent.
//!
//! Vigil watches the Kubernetes event stream for failure signals, enriches
//! each incident with log context and recent deployment history, asks a
//! scoring model for a risk verdict, and routes the result to chat and
//! paging channels.
//!
//! # Architecture
//!
//! - [`watcher::EventWatcher`] owns the event-feed subscription and
//!   reconnects with backoff; qualifying warning records are normalized by
//!   [`incident::Normalizer`] and handed to the orchestrator.
//! - [`orchestrator::Orchestrator`] deduplicates by correlation key, runs
//!   each admitted incident as its own task, fans out to the context
//!   collectors in parallel, then assesses risk and notifies.
//! - [`context`] collectors (Loki logs, GitHub history) degrade
//!   independently; a timeout or failure marks its slice uncollected and the
//!   pipeline continues.
//! - [`router::NotificationRouter`] always sends the chat summary and pages
//!   only when the escalation policy matches the incident reason.

pub mod config;
pub mod context;
pub mod dedup;
pub mod incident;
pub mod orchestrator;
pub mod remediation;
pub mod risk;
pub mod router;
pub mod watcher;

pub use config::AgentConfig;
pub use incident::{IncidentEvent, IncidentKind, Normalizer};
pub use orchestrator::Orchestrator;
pub use router::{EscalationPolicy, NotificationRouter};
pub use watcher::{BackoffConfig, EventWatcher};
