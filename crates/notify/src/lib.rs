//! Notification channels for vigil incident alerts.
//!
//! This crate provides the channel layer used to deliver incident alerts to
//! messaging and paging services. Channels are one-shot: a failed delivery is
//! reported to the caller and logged, never retried here.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Alert, NotifyChannel, Severity, SlackChannel};
//!
//! # async fn example() {
//! let channel = SlackChannel::from_env();
//!
//! if channel.enabled() {
//!     let alert = Alert {
//!         title: "CrashLoopBackOff: payments/billing-api".to_string(),
//!         body: "Back-off restarting failed container".to_string(),
//!         severity: Severity::Critical,
//!         correlation_key: "payments/billing-api:CrashLoopBackOff".to_string(),
//!         fields: vec![],
//!         dashboard_url: None,
//!         timestamp: chrono::Utc::now(),
//!     };
//!     let _ = channel.send(&alert).await;
//! }
//! # }
//! ```
//!
//! # Configuration
//!
//! Channels are configured via environment variables:
//!
//! - `SLACK_WEBHOOK_URL`: Slack incoming-webhook URL (enables the chat channel)
//! - `PAGERDUTY_API_KEY` / `PAGERDUTY_SERVICE_ID`: PagerDuty REST credentials
//!   (enable the paging channel)
//! - `PAGERDUTY_FROM`: requester email sent in the `From:` header (optional)
//!
//! # Architecture
//!
//! - [`NotifyChannel`] trait defines the interface for channels
//! - [`SlackChannel`] implements Slack webhook delivery
//! - [`PagerdutyChannel`] implements PagerDuty incident creation
//! - [`Alert`] is the channel-independent payload composed by the caller

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alert;
pub mod channels;
pub mod error;

pub use alert::{Alert, Severity};
pub use channels::pagerduty::PagerdutyChannel;
pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
