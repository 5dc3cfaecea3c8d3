//! Mail endpoint traits.
//!
//! The round trip task only needs two capabilities: handing a message to an
//! outbound server ([`MailSender`]) and watching an inbound mailbox
//! ([`MailboxConnector`] / [`MailboxSession`]). Concrete endpoints speak SMTP
//! and IMAP; tests plug in in-memory fakes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::Message;

use crate::domain::CorrelationId;

/// Result type alias for mail endpoint operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Name of the header carrying the correlation id.
pub const MAIL_ROUND_HEADER: &str = "X-Mail-Round";

/// Subject of every test mail.
pub const PROBE_SUBJECT: &str = "[MailRound]";

/// Body of every test mail.
pub const PROBE_BODY: &str = "This is a TestMail from MailRound.\n\
Please do not delete this E-Mail Message.\n\
If MailRound works it will be deleted\n";

/// Errors that can occur while talking to a mail server.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Login was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network, TLS or transport error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered a command with an error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The test mail could not be built.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The endpoint cannot perform the requested operation.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// The `X-Mail-Round` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XMailRound(pub String);

impl Header for XMailRound {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(MAIL_ROUND_HEADER)
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.trim().to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// The test mail sent by one round trip.
#[derive(Debug, Clone)]
pub struct ProbeMessage {
    pub from: String,
    pub to: String,
    pub correlation_id: CorrelationId,
}

impl ProbeMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            correlation_id,
        }
    }

    /// Builds the RFC 5322 message.
    pub fn build(&self) -> Result<Message> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| ProviderError::InvalidMessage(format!("invalid sender {}: {}", self.from, e)))?;
        let to: Mailbox = self
            .to
            .parse()
            .map_err(|e| ProviderError::InvalidMessage(format!("invalid recipient {}: {}", self.to, e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(PROBE_SUBJECT)
            .header(XMailRound(self.correlation_id.to_string()))
            .body(PROBE_BODY.to_string())
            .map_err(|e| ProviderError::InvalidMessage(e.to_string()))
    }
}

/// Outcome of one bounded wait on a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// The server reported a change in the selected folder.
    NewData,
    /// Nothing happened before the wait expired.
    Timeout,
}

/// Outbound side of a round trip.
///
/// Each call opens its own connection and closes it before returning,
/// whether or not the transfer succeeded.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: &ProbeMessage) -> Result<()>;
}

/// Opens authenticated sessions on an inbound mailbox.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>>;
}

/// An open, authenticated inbound session.
#[async_trait]
pub trait MailboxSession: Send {
    /// Selects the folder that later calls operate on.
    async fn select(&mut self, folder: &str) -> Result<()>;

    /// Returns every message in the selected folder keyed by UID.
    async fn search_and_fetch(&mut self) -> Result<BTreeMap<u32, Vec<u8>>>;

    /// Flags a message as deleted and expunges it.
    async fn delete(&mut self, uid: u32) -> Result<()>;

    /// Blocks until the server reports activity or `timeout` expires.
    async fn wait_for_activity(&mut self, timeout: Duration) -> Result<Activity>;

    /// Logs out. Errors are reported but the session is gone either way.
    async fn close(self: Box<Self>) -> Result<()>;
}
