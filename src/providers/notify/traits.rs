//! Notifier trait definition.

use async_trait::async_trait;

/// Result type alias for notifier operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors that can occur while delivering a failure report.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The request could not be sent.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink answered with a non-success status.
    #[error("webhook rejected report with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// A failed round trip, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// `out->in`.
    pub pair_name: String,
    /// Captured diagnostic log of the round trip.
    pub detail: String,
}

impl FailureReport {
    pub fn new(pair_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            pair_name: pair_name.into(),
            detail: detail.into(),
        }
    }

    /// Chat-style message text.
    pub fn text(&self) -> String {
        format!(
            "*Mailround*\nError between {}\n```{}```",
            self.pair_name, self.detail
        )
    }
}

/// Delivers failure reports to an external sink.
///
/// Delivery is best-effort: callers log errors and never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, report: &FailureReport) -> Result<()>;
}
