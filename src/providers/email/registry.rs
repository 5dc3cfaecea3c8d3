//! Lookup of configured mail endpoints by server name.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ImapConnector, MailSender, MailboxConnector, SmtpSender};
use crate::config::Settings;
use crate::domain::{RoundPair, ServerKind};

/// Endpoints available to round trips, keyed by configured server name.
#[derive(Clone, Default)]
pub struct EndpointRegistry {
    senders: HashMap<String, Arc<dyn MailSender>>,
    mailboxes: HashMap<String, Arc<dyn MailboxConnector>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds SMTP senders and IMAP connectors for every configured server.
    ///
    /// POP servers are skipped; configuration validation already rejects
    /// rounds that would need one.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::new();

        for (name, server) in &settings.outbound {
            registry = registry.with_sender(name.clone(), Arc::new(SmtpSender::new(name, server.clone())));
        }

        for (name, server) in &settings.inbound {
            if server.kind == ServerKind::Imap {
                registry = registry
                    .with_mailbox(name.clone(), Arc::new(ImapConnector::new(name, server.clone())));
            }
        }

        registry
    }

    pub fn with_sender(mut self, name: impl Into<String>, sender: Arc<dyn MailSender>) -> Self {
        self.senders.insert(name.into(), sender);
        self
    }

    pub fn with_mailbox(
        mut self,
        name: impl Into<String>,
        mailbox: Arc<dyn MailboxConnector>,
    ) -> Self {
        self.mailboxes.insert(name.into(), mailbox);
        self
    }

    pub fn sender(&self, name: &str) -> Option<Arc<dyn MailSender>> {
        self.senders.get(name).cloned()
    }

    pub fn mailbox(&self, name: &str) -> Option<Arc<dyn MailboxConnector>> {
        self.mailboxes.get(name).cloned()
    }

    /// Returns both endpoints of a pair, if configured.
    pub fn pair(
        &self,
        pair: &RoundPair,
    ) -> Option<(Arc<dyn MailSender>, Arc<dyn MailboxConnector>)> {
        Some((self.sender(&pair.out)?, self.mailbox(&pair.inbound)?))
    }

    /// Iterates over all inbound connectors.
    pub fn mailboxes(&self) -> impl Iterator<Item = (&str, &Arc<dyn MailboxConnector>)> {
        self.mailboxes.iter().map(|(name, mailbox)| (name.as_str(), mailbox))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MailCredentials, ServerSettings};

    fn server(kind: ServerKind) -> ServerSettings {
        ServerSettings {
            kind,
            host: "mail.example.com".to_string(),
            port: 993,
            use_ssl: true,
            email: "probe@example.com".to_string(),
            credentials: MailCredentials::new("probe", "secret"),
        }
    }

    #[test]
    fn from_settings_registers_senders_and_imap_mailboxes() {
        let mut settings = Settings::default();
        settings
            .outbound
            .insert("vps1".to_string(), server(ServerKind::Smtp));
        settings
            .inbound
            .insert("vps2".to_string(), server(ServerKind::Imap));
        settings
            .inbound
            .insert("pop1".to_string(), server(ServerKind::Pop));

        let registry = EndpointRegistry::from_settings(&settings);

        assert!(registry.sender("vps1").is_some());
        assert!(registry.mailbox("vps2").is_some());
        assert!(registry.mailbox("pop1").is_none());
        assert!(registry.pair(&RoundPair::new("vps1", "vps2")).is_some());
        assert!(registry.pair(&RoundPair::new("vps1", "pop1")).is_none());
        assert_eq!(registry.mailboxes().count(), 1);
    }
}
