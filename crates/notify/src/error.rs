//! Error types for the notification channels.

use thiserror::Error;

/// Errors that can occur when sending an alert to a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The service rejected the request
    #[error("{service} returned {status}: {body}")]
    Rejected {
        service: &'static str,
        status: u16,
        body: String,
    },
}
