//! Failure report delivery.
//!
//! - [`WebhookNotifier`] - JSON POST to a chat webhook
//! - [`LogNotifier`] - Fallback that only writes to the process log

mod traits;
mod webhook;

#[cfg(test)]
pub use traits::MockNotifier;
pub use traits::{FailureReport, Notifier, NotifyError, Result};
pub use webhook::{LogNotifier, WebhookNotifier};
