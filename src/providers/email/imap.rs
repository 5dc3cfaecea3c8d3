//! IMAP inbound endpoint.
//!
//! # Protocol Details
//!
//! - Uses IMAP4rev1 (RFC 3501) via `async-imap`
//! - Implicit TLS when `use_ssl` is set, STARTTLS on a plain connection otherwise
//! - Waits for new mail with IDLE (RFC 2177), bounded per call

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use async_trait::async_trait;
use futures::TryStreamExt;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use super::{Activity, MailboxConnector, MailboxSession, ProviderError, Result};
use crate::config::ServerSettings;
use crate::domain::ServerKind;

/// Type alias for the IMAP session with TLS (using tokio-util compat layer).
type ImapSession = async_imap::Session<Compat<TlsStream<TcpStream>>>;

/// Connects to one configured IMAP mailbox.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    name: String,
    config: ServerSettings,
}

impl ImapConnector {
    pub fn new(name: impl Into<String>, config: ServerSettings) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Returns the configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds a connector on the `ring` provider with the webpki roots.
    ///
    /// The provider is chosen explicitly since the dependency graph enables
    /// more than one rustls backend.
    fn tls_connector() -> Result<TlsConnector> {
        let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| ProviderError::Connection(format!("TLS setup failed: {}", e)))?
            .with_root_certificates(RootCertStore::from_iter(
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
            ))
            .with_no_client_auth();

        Ok(TlsConnector::from(Arc::new(config)))
    }

    async fn connect_tcp(&self) -> Result<TcpStream> {
        TcpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| ProviderError::Connection(format!("TCP connect failed: {}", e)))
    }

    async fn upgrade(&self, tcp_stream: TcpStream) -> Result<Compat<TlsStream<TcpStream>>> {
        let server_name = ServerName::try_from(self.config.host.clone())
            .map_err(|e| ProviderError::Connection(format!("invalid server name: {}", e)))?;

        let tls_stream = Self::tls_connector()?
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| ProviderError::Connection(format!("TLS handshake failed: {}", e)))?;

        Ok(tls_stream.compat())
    }

    /// Establishes an implicit TLS connection.
    async fn connect_tls(&self) -> Result<Compat<TlsStream<TcpStream>>> {
        let tcp_stream = self.connect_tcp().await?;
        self.upgrade(tcp_stream).await
    }

    /// Establishes a plain connection and upgrades it with STARTTLS.
    async fn connect_starttls(&self) -> Result<Compat<TlsStream<TcpStream>>> {
        let tcp_stream = self.connect_tcp().await?;
        let mut client = async_imap::Client::new(tcp_stream.compat());

        client
            .read_response()
            .await
            .ok_or_else(|| ProviderError::Protocol("no greeting from server".to_string()))?
            .map_err(|e| ProviderError::Connection(format!("reading greeting failed: {}", e)))?;

        client
            .run_command_and_check_ok("STARTTLS", None)
            .await
            .map_err(|e| ProviderError::Protocol(format!("STARTTLS failed: {}", e)))?;

        let plain = client.into_inner().into_inner();
        self.upgrade(plain).await
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>> {
        if self.config.kind != ServerKind::Imap {
            return Err(ProviderError::Unsupported(format!(
                "{} is a {} server, only IMAP mailboxes can be watched",
                self.name, self.config.kind
            )));
        }

        let stream = if self.config.use_ssl {
            self.connect_tls().await?
        } else {
            self.connect_starttls().await?
        };

        let client = async_imap::Client::new(stream);
        let session = client
            .login(
                &self.config.credentials.username,
                self.config.credentials.password(),
            )
            .await
            .map_err(|(e, _)| ProviderError::Authentication(format!("IMAP login failed: {}", e)))?;

        tracing::debug!(server = %self.name, host = %self.config.host, "IMAP session opened");
        Ok(Box::new(ImapMailbox::new(session)))
    }
}

/// An authenticated IMAP session.
///
/// The session is moved out while IDLE is active; an error during IDLE
/// leaves the mailbox without a session and every later call fails.
pub struct ImapMailbox {
    session: Option<ImapSession>,
    expunge: Option<ExpungeScope>,
}

/// What an expunge after flagging a message removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpungeScope {
    /// `UID EXPUNGE` of the flagged message only (UIDPLUS, RFC 4315).
    Uid,
    /// Plain `EXPUNGE` of every `\Deleted` message in the folder.
    Folder,
}

impl ExpungeScope {
    fn for_server(uidplus: bool) -> Self {
        if uidplus {
            ExpungeScope::Uid
        } else {
            ExpungeScope::Folder
        }
    }
}

impl ImapMailbox {
    fn new(session: ImapSession) -> Self {
        Self {
            session: Some(session),
            expunge: None,
        }
    }

    /// Asks the server once whether it supports UIDPLUS.
    async fn expunge_scope(&mut self) -> Result<ExpungeScope> {
        if let Some(scope) = self.expunge {
            return Ok(scope);
        }

        let capabilities = self
            .session()?
            .capabilities()
            .await
            .map_err(|e| ProviderError::Protocol(format!("CAPABILITY failed: {}", e)))?;
        let scope = ExpungeScope::for_server(capabilities.has_str("UIDPLUS"));
        tracing::debug!(scope = ?scope, "IMAP expunge scope");

        self.expunge = Some(scope);
        Ok(scope)
    }

    fn session(&mut self) -> Result<&mut ImapSession> {
        self.session
            .as_mut()
            .ok_or_else(|| ProviderError::Connection("session lost".to_string()))
    }

    /// Consumes a stream to completion.
    async fn drain_stream<T, E>(
        stream: impl futures::Stream<Item = std::result::Result<T, E>>,
    ) -> std::result::Result<(), E> {
        use futures::StreamExt;
        futures::pin_mut!(stream);
        while let Some(result) = stream.next().await {
            result?;
        }
        Ok(())
    }
}

#[async_trait]
impl MailboxSession for ImapMailbox {
    async fn select(&mut self, folder: &str) -> Result<()> {
        self.session()?
            .select(folder)
            .await
            .map_err(|e| ProviderError::Protocol(format!("SELECT failed: {}", e)))?;
        Ok(())
    }

    async fn search_and_fetch(&mut self) -> Result<BTreeMap<u32, Vec<u8>>> {
        let session = self.session()?;

        let uids = session
            .uid_search("ALL")
            .await
            .map_err(|e| ProviderError::Protocol(format!("SEARCH failed: {}", e)))?;

        if uids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut uid_list: Vec<_> = uids.into_iter().collect();
        uid_list.sort_unstable();
        let uid_seq = uid_list
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches: Vec<_> = session
            .uid_fetch(&uid_seq, "(UID BODY.PEEK[])")
            .await
            .map_err(|e| ProviderError::Protocol(format!("FETCH failed: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| ProviderError::Protocol(format!("FETCH stream: {}", e)))?;

        Ok(fetches
            .iter()
            .filter_map(|fetch| Some((fetch.uid?, fetch.body()?.to_vec())))
            .collect())
    }

    async fn delete(&mut self, uid: u32) -> Result<()> {
        let scope = self.expunge_scope().await?;
        let session = self.session()?;
        let uid = uid.to_string();

        let store_stream = session
            .uid_store(&uid, "+FLAGS (\\Deleted)")
            .await
            .map_err(|e| ProviderError::Protocol(format!("STORE failed: {}", e)))?;
        Self::drain_stream(store_stream)
            .await
            .map_err(|e| ProviderError::Protocol(format!("STORE stream: {}", e)))?;

        match scope {
            ExpungeScope::Uid => {
                let expunge_stream = session
                    .uid_expunge(&uid)
                    .await
                    .map_err(|e| ProviderError::Protocol(format!("UID EXPUNGE failed: {}", e)))?;
                Self::drain_stream(expunge_stream)
                    .await
                    .map_err(|e| ProviderError::Protocol(format!("UID EXPUNGE stream: {}", e)))?;
            }
            ExpungeScope::Folder => {
                let expunge_stream = session
                    .expunge()
                    .await
                    .map_err(|e| ProviderError::Protocol(format!("EXPUNGE failed: {}", e)))?;
                Self::drain_stream(expunge_stream)
                    .await
                    .map_err(|e| ProviderError::Protocol(format!("EXPUNGE stream: {}", e)))?;
            }
        }

        Ok(())
    }

    async fn wait_for_activity(&mut self, timeout: Duration) -> Result<Activity> {
        let session = self
            .session
            .take()
            .ok_or_else(|| ProviderError::Connection("session lost".to_string()))?;

        let mut handle = session.idle();
        handle
            .init()
            .await
            .map_err(|e| ProviderError::Protocol(format!("IDLE failed: {}", e)))?;

        let response = {
            let (idle_wait, _interrupt) = handle.wait_with_timeout(timeout);
            idle_wait
                .await
                .map_err(|e| ProviderError::Connection(format!("IDLE wait failed: {}", e)))?
        };

        let session = handle
            .done()
            .await
            .map_err(|e| ProviderError::Protocol(format!("DONE failed: {}", e)))?;
        self.session = Some(session);

        Ok(match response {
            IdleResponse::NewData(_) => Activity::NewData,
            IdleResponse::Timeout | IdleResponse::ManualInterrupt => Activity::Timeout,
        })
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session
                .logout()
                .await
                .map_err(|e| ProviderError::Connection(format!("LOGOUT failed: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailCredentials;

    fn settings(kind: ServerKind) -> ServerSettings {
        ServerSettings {
            kind,
            host: "imap.example.com".to_string(),
            port: 993,
            use_ssl: true,
            email: "probe@example.com".to_string(),
            credentials: MailCredentials::new("probe", "secret"),
        }
    }

    #[test]
    fn connector_keeps_name() {
        let connector = ImapConnector::new("vps2", settings(ServerKind::Imap));
        assert_eq!(connector.name(), "vps2");
    }

    #[tokio::test]
    async fn pop_server_is_rejected_before_connecting() {
        let connector = ImapConnector::new("pop1", settings(ServerKind::Pop));
        let result = connector.connect().await;
        assert!(matches!(result, Err(ProviderError::Unsupported(_))));
    }

    #[tokio::test]
    async fn lost_session_is_reported() {
        let mut mailbox = ImapMailbox {
            session: None,
            expunge: None,
        };
        assert!(matches!(
            mailbox.search_and_fetch().await,
            Err(ProviderError::Connection(_))
        ));
        assert!(Box::new(mailbox).close().await.is_ok());
    }

    #[test]
    fn tls_connector_builds() {
        assert!(ImapConnector::tls_connector().is_ok());
    }

    #[tokio::test]
    async fn delete_without_session_fails_before_expunge() {
        let mut mailbox = ImapMailbox {
            session: None,
            expunge: None,
        };
        assert!(matches!(
            mailbox.delete(7).await,
            Err(ProviderError::Connection(_))
        ));
        assert_eq!(mailbox.expunge, None);
    }

    #[test]
    fn uid_expunge_needs_uidplus() {
        assert_eq!(ExpungeScope::for_server(true), ExpungeScope::Uid);
        assert_eq!(ExpungeScope::for_server(false), ExpungeScope::Folder);
    }
}
