//! Probe services layer.
//!
//! This module contains the services that orchestrate the probe, coordinating
//! between mail endpoints, the notifier and the status log.
//!
//! # Architecture
//!
//! ```text
//!      Scheduler
//!          |
//!          v
//!     Round Trip  ------> Notifier (on failure)
//!          |
//!          v
//!   Status Log Engine --> status log file
//! ```
//!
//! # Services Overview
//!
//! - [`Scheduler`]: Starts one round trip per pair and check interval
//! - [`RoundTrip`]: Sends a correlated test mail and waits for it
//! - [`StatusLogEngine`]: Single writer of the signed status log
//! - [`sweep_mailbox`]: Removes leftover test mails

mod diagnostics;
mod mailbox_sweep;
mod round_trip;
mod scheduler;
mod status_log;

pub use diagnostics::{DiagnosticLevel, DiagnosticLog};
pub use mailbox_sweep::sweep_mailbox;
pub use round_trip::{
    verify_message, ProbeFailure, RoundEndpoints, RoundTrip, RoundTripOptions, RoundTripOutcome,
    RoundTripReport, RoundTripState, Verification, INBOX,
};
pub use scheduler::Scheduler;
pub use status_log::{StatusLog, StatusLogEngine, StatusWriter, STATUS_LOG_ALERT_NAME};
