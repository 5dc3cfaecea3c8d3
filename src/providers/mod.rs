//! External collaborators of the probe.
//!
//! - [`email`] - Mail endpoints (SMTP senders, IMAP mailboxes)
//! - [`notify`] - Failure report sinks (webhook, log)

pub mod email;
pub mod notify;
