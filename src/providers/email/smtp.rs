//! SMTP outbound endpoint.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use super::{MailSender, ProbeMessage, ProviderError, Result};
use crate::config::ServerSettings;
use crate::domain::ServerKind;

/// Upper bound for a single SMTP command.
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends test mails through one configured SMTP relay.
///
/// A transport is built per send, so the connection never outlives the call.
#[derive(Debug, Clone)]
pub struct SmtpSender {
    name: String,
    config: ServerSettings,
}

impl SmtpSender {
    pub fn new(name: impl Into<String>, config: ServerSettings) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let smtp_credentials = SmtpCredentials::new(
            self.config.credentials.username.clone(),
            self.config.credentials.password().to_string(),
        );

        let builder = if self.config.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
        }
        .map_err(|e| ProviderError::Connection(format!("SMTP relay error: {}", e)))?;

        Ok(builder
            .credentials(smtp_credentials)
            .port(self.config.port)
            .timeout(Some(SMTP_TIMEOUT))
            .build())
    }
}

#[async_trait]
impl MailSender for SmtpSender {
    async fn send(&self, message: &ProbeMessage) -> Result<()> {
        if self.config.kind != ServerKind::Smtp {
            return Err(ProviderError::Unsupported(format!(
                "{} is a {} server, only SMTP relays can send",
                self.name, self.config.kind
            )));
        }

        let email = message.build()?;
        let mailer = self.transport()?;

        let response = mailer.send(email).await.map_err(|e| {
            if e.is_permanent() || e.is_transient() {
                ProviderError::Protocol(format!("SMTP send failed: {}", e))
            } else {
                ProviderError::Connection(format!("SMTP send failed: {}", e))
            }
        })?;

        tracing::debug!(
            server = %self.name,
            code = %response.code(),
            "Test mail accepted"
        );
        Ok(())
    }
}
