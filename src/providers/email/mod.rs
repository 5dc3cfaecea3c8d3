//! Mail endpoint implementations.
//!
//! This module contains the endpoint traits used by round trips and their
//! implementations for real mail servers:
//!
//! - [`SmtpSender`] - Outbound test mail via SMTP (implicit TLS or STARTTLS)
//! - [`ImapConnector`] - Inbound mailbox watching via IMAP with IDLE
//!
//! # Architecture
//!
//! Round trips never see concrete endpoints. They receive a
//! [`MailSender`] and a [`MailboxConnector`] from the [`EndpointRegistry`],
//! which lets tests substitute in-memory mailboxes.
//!
//! # Example
//!
//! ```ignore
//! use mailround::providers::email::{EndpointRegistry, ProbeMessage};
//! use mailround::domain::CorrelationId;
//!
//! async fn send_one(registry: &EndpointRegistry) {
//!     let sender = registry.sender("vps1").expect("unknown server");
//!     let message = ProbeMessage::new("out@example.com", "in@example.com", CorrelationId::generate());
//!     sender.send(&message).await.expect("send failed");
//! }
//! ```

mod imap;
mod registry;
mod smtp;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use imap::{ImapConnector, ImapMailbox};
pub use registry::EndpointRegistry;
pub use smtp::SmtpSender;
pub use traits::{
    Activity, MailSender, MailboxConnector, MailboxSession, ProbeMessage, ProviderError, Result,
    XMailRound, MAIL_ROUND_HEADER, PROBE_BODY, PROBE_SUBJECT,
};
