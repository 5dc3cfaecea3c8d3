//! Round trip task.
//!
//! One [`RoundTrip`] sends a correlated test mail through an outbound server
//! and watches the inbound mailbox until that exact mail shows up, the receive
//! bound expires, or an endpoint fails.
//!
//! ```text
//! CREATED -> SENDING -> SENT_ERROR ----------------------------+
//!                    -> SENT -> RECEIVING -> FOUND ------------|--> DONE
//!                                         -> TIMEOUT ------+   |
//!                                         -> RECEIVE_ERROR +-> NOTIFYING
//! ```
//!
//! Failures never leave the task: they end up in the diagnostic log, as a
//! terminal `error` status event and in a single failure report.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mailparse::MailHeaderMap;
use thiserror::Error;
use tokio::time::Instant;

use super::diagnostics::DiagnosticLog;
use super::status_log::StatusLog;
use crate::config::{ServerSettings, Settings};
use crate::domain::{CorrelationId, RoundPair, StatusEvent, StatusKind};
use crate::providers::email::{
    Activity, EndpointRegistry, MailSender, MailboxConnector, MailboxSession, ProbeMessage,
    ProviderError, MAIL_ROUND_HEADER,
};
use crate::providers::notify::{FailureReport, Notifier};

/// Folder watched for the test mail.
pub const INBOX: &str = "INBOX";

/// Extra time granted to a hanging mailbox past the receive bound.
const HANG_GRACE: Duration = Duration::from_secs(5);

/// Terminal failures of a round trip.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    /// The outbound server did not accept the test mail.
    #[error("sending via {server} failed: {source}")]
    Send {
        server: String,
        source: ProviderError,
    },

    /// The test mail did not arrive in time.
    #[error("test mail not received within {0:?}")]
    ReceiveTimeout(Duration),

    /// The inbound mailbox could not be watched.
    #[error("receiving at {server} failed: {source}")]
    Receive {
        server: String,
        source: ProviderError,
    },
}

impl ProbeFailure {
    /// Short machine-readable name stored with the `error` event.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeFailure::Send { .. } => "send_failure",
            ProbeFailure::ReceiveTimeout(_) => "receive_timeout",
            ProbeFailure::Receive { .. } => "receive_failure",
        }
    }
}

/// Lifecycle of a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTripState {
    Created,
    Sending,
    Sent,
    SentError,
    Receiving,
    Found,
    Timeout,
    ReceiveError,
    Notifying,
    Done,
}

/// How a round trip ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTripOutcome {
    Found,
    Timeout,
    ReceiveError,
    SentError,
}

impl RoundTripOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RoundTripOutcome::Found)
    }
}

/// Summary returned once a round trip is done.
#[derive(Debug, Clone)]
pub struct RoundTripReport {
    pub correlation_id: CorrelationId,
    pub pair: RoundPair,
    pub outcome: RoundTripOutcome,
    pub graylisting_suspected: bool,
    /// Whether a failure report was handed to the notifier.
    pub notified: bool,
    /// Whether the notifier accepted the report.
    pub delivered: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Tunables of a single round trip.
#[derive(Debug, Clone)]
pub struct RoundTripOptions {
    pub max_receive_time: Duration,
    pub idle_slice: Duration,
    pub cleanup: bool,
    pub debug: bool,
    pub folder: String,
    /// How long a mailbox may stay silent past `max_receive_time`, and how
    /// long closing it may take.
    pub hang_grace: Duration,
}

impl RoundTripOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_receive_time: settings.max_receive_time,
            idle_slice: settings.idle_slice,
            cleanup: settings.cleanup,
            debug: settings.debug,
            folder: INBOX.to_string(),
            hang_grace: HANG_GRACE,
        }
    }
}

impl Default for RoundTripOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// The two endpoints of a pair plus the addresses used on the test mail.
#[derive(Clone)]
pub struct RoundEndpoints {
    pub sender: Arc<dyn MailSender>,
    pub mailbox: Arc<dyn MailboxConnector>,
    pub from: String,
    pub to: String,
    details: Vec<String>,
}

impl RoundEndpoints {
    pub fn new(
        sender: Arc<dyn MailSender>,
        mailbox: Arc<dyn MailboxConnector>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            mailbox,
            from: from.into(),
            to: to.into(),
            details: Vec::new(),
        }
    }

    /// Looks up both servers of `pair`.
    pub fn resolve(pair: &RoundPair, settings: &Settings, registry: &EndpointRegistry) -> Option<Self> {
        let out = settings.outbound.get(&pair.out)?;
        let inbound = settings.inbound.get(&pair.inbound)?;
        let (sender, mailbox) = registry.pair(pair)?;

        let mut endpoints = Self::new(sender, mailbox, out.email.clone(), inbound.email.clone());
        endpoints.details = describe("OutServer", out)
            .into_iter()
            .chain(describe("InServer", inbound))
            .collect();
        Some(endpoints)
    }
}

fn describe(title: &str, server: &ServerSettings) -> Vec<String> {
    vec![
        title.to_string(),
        format!("Host: {}", server.host),
        format!("Port: {}", server.port),
        format!("SSL: {}", server.use_ssl),
        format!("User: {}", server.credentials.username),
    ]
}

/// Result of checking one fetched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Carries this round trip's correlation id.
    Match,
    /// Carries the correlation header of another round trip.
    Foreign,
    /// Not a test mail.
    Unrelated,
}

/// Classifies a raw message against a correlation id.
pub fn verify_message(raw: &[u8], id: &CorrelationId) -> Verification {
    let Ok((headers, _)) = mailparse::parse_headers(raw) else {
        return Verification::Unrelated;
    };

    let values = headers.get_all_values(MAIL_ROUND_HEADER);
    if values.is_empty() {
        Verification::Unrelated
    } else if values.iter().any(|v| v.trim() == id.as_str()) {
        Verification::Match
    } else {
        Verification::Foreign
    }
}

/// One send-then-verify cycle for a pair.
pub struct RoundTrip {
    id: CorrelationId,
    pair: RoundPair,
    endpoints: RoundEndpoints,
    options: RoundTripOptions,
    status_log: StatusLog,
    notifier: Arc<dyn Notifier>,
    state: RoundTripState,
    graylisting: bool,
    log: DiagnosticLog,
    started_at: DateTime<Utc>,
}

impl RoundTrip {
    pub fn new(
        pair: RoundPair,
        endpoints: RoundEndpoints,
        options: RoundTripOptions,
        status_log: StatusLog,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let log = DiagnosticLog::new(&pair, options.debug);
        Self {
            id: CorrelationId::generate(),
            pair,
            endpoints,
            options,
            status_log,
            notifier,
            state: RoundTripState::Created,
            graylisting: false,
            log,
            started_at: Utc::now(),
        }
    }

    /// Replaces the generated correlation id.
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.id = id;
        self
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn state(&self) -> RoundTripState {
        self.state
    }

    /// Runs the round trip to completion.
    pub async fn run(mut self) -> RoundTripReport {
        let clock = Instant::now();
        self.emit(StatusKind::Start);
        self.log.info(format!(
            "Test Connection between {} and {}",
            self.pair.out, self.pair.inbound
        ));
        for line in std::mem::take(&mut self.endpoints.details) {
            self.log.debug(line);
        }

        self.emit(StatusKind::StartSendmail);
        self.transition(RoundTripState::Sending);

        let result = match self.send().await {
            Err(failure) => {
                self.transition(RoundTripState::SentError);
                Err(failure)
            }
            Ok(()) => {
                self.emit(StatusKind::EndSendmail);
                self.transition(RoundTripState::Sent);

                self.emit(StatusKind::StartReceive);
                self.transition(RoundTripState::Receiving);
                match self.receive().await {
                    Ok(()) => {
                        self.emit(StatusKind::EndReceive);
                        self.transition(RoundTripState::Found);
                        Ok(())
                    }
                    Err(failure @ ProbeFailure::ReceiveTimeout(_)) => {
                        self.emit(StatusKind::EndReceive);
                        self.transition(RoundTripState::Timeout);
                        Err(failure)
                    }
                    Err(failure) => {
                        self.transition(RoundTripState::ReceiveError);
                        Err(failure)
                    }
                }
            }
        };

        let outcome = match self.state {
            RoundTripState::Found => RoundTripOutcome::Found,
            RoundTripState::Timeout => RoundTripOutcome::Timeout,
            RoundTripState::SentError => RoundTripOutcome::SentError,
            _ => RoundTripOutcome::ReceiveError,
        };

        let (notified, delivered) = match result {
            Ok(()) => {
                self.emit(StatusKind::Success);
                self.log.info(format!(
                    "SUCCESS between {} to {}",
                    self.pair.out, self.pair.inbound
                ));
                (false, false)
            }
            Err(failure) => {
                self.log.error(failure.to_string());
                if self.graylisting {
                    self.emit(StatusKind::Graylisting);
                }
                self.status_log.record(
                    StatusEvent::now(&self.id, &self.pair, StatusKind::Error)
                        .with_extra("reason", failure.kind()),
                );
                self.transition(RoundTripState::Notifying);
                (true, self.notify().await)
            }
        };

        self.transition(RoundTripState::Done);

        RoundTripReport {
            correlation_id: self.id,
            pair: self.pair,
            outcome,
            graylisting_suspected: self.graylisting,
            notified,
            delivered,
            started_at: self.started_at,
            elapsed: clock.elapsed(),
        }
    }

    fn emit(&self, kind: StatusKind) {
        self.status_log
            .record(StatusEvent::now(&self.id, &self.pair, kind));
    }

    fn transition(&mut self, next: RoundTripState) {
        tracing::trace!(pair = %self.pair, from = ?self.state, to = ?next, "Round trip state change");
        self.state = next;
    }

    async fn send(&mut self) -> Result<(), ProbeFailure> {
        self.log
            .debug(format!("Try to send mail via {}", self.pair.out));

        let message = ProbeMessage::new(
            self.endpoints.from.clone(),
            self.endpoints.to.clone(),
            self.id.clone(),
        );

        if let Err(source) = self.endpoints.sender.send(&message).await {
            self.log.error(format!(
                "Error sending E-Mail via {}: {}",
                self.pair.out, source
            ));
            return Err(ProbeFailure::Send {
                server: self.pair.out.clone(),
                source,
            });
        }

        self.log
            .info(format!("E-Mail successfully sent via {}", self.pair.out));
        Ok(())
    }

    async fn receive(&mut self) -> Result<(), ProbeFailure> {
        self.log.debug("Wait for E-Mail");
        let deadline = Instant::now() + self.options.max_receive_time;

        let mut slot: Option<Box<dyn MailboxSession>> = None;
        let watched = tokio::time::timeout_at(
            deadline + self.options.hang_grace,
            self.watch(&mut slot, deadline),
        )
        .await;
        let result = match watched {
            Ok(result) => result,
            Err(_) => {
                self.log.warn("Mailbox stopped responding. Terminate");
                Err(ProbeFailure::ReceiveTimeout(self.options.max_receive_time))
            }
        };

        if let Some(session) = slot.take() {
            match tokio::time::timeout(self.options.hang_grace, session.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.log.warn(format!("Closing mailbox failed: {}", e)),
                Err(_) => self.log.warn("Closing mailbox timed out"),
            }
        }

        if self.graylisting {
            self.log.warn(
                "Found other E-Mails with Mail-Round Header. This is a note for active graylisting",
            );
        }

        match &result {
            Ok(()) => self.log.info(format!(
                "E-Mail successfully received at {} from {}",
                self.pair.inbound, self.pair.out
            )),
            Err(ProbeFailure::ReceiveTimeout(_)) => {}
            Err(e) => self.log.error(format!(
                "Error receiving E-Mail at mailbox {}: {}",
                self.pair.inbound, e
            )),
        }

        result
    }

    async fn watch(
        &mut self,
        slot: &mut Option<Box<dyn MailboxSession>>,
        deadline: Instant,
    ) -> Result<(), ProbeFailure> {
        let session = self
            .endpoints
            .mailbox
            .connect()
            .await
            .map_err(|source| self.receive_failure(source))?;
        let session = slot.insert(session);

        session
            .select(&self.options.folder)
            .await
            .map_err(|source| self.receive_failure(source))?;

        loop {
            if self.search(session.as_mut()).await? {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                self.log
                    .warn("Maximal Mailbox watchtime reached. Terminate");
                return Err(ProbeFailure::ReceiveTimeout(self.options.max_receive_time));
            }

            let slice = self.options.idle_slice.min(deadline - now);
            match session
                .wait_for_activity(slice)
                .await
                .map_err(|source| self.receive_failure(source))?
            {
                Activity::NewData => self.log.debug("Mailbox reported new data"),
                Activity::Timeout => self.log.debug("Idle wait expired"),
            }
        }
    }

    /// Searches the selected folder once; returns whether the test mail was found.
    async fn search(&mut self, session: &mut dyn MailboxSession) -> Result<bool, ProbeFailure> {
        let messages = session
            .search_and_fetch()
            .await
            .map_err(|source| self.receive_failure(source))?;

        for (uid, raw) in messages {
            match verify_message(&raw, &self.id) {
                Verification::Match => {
                    self.log.debug("Found Mail with same correlation id");
                    if self.options.cleanup {
                        if let Err(e) = session.delete(uid).await {
                            self.log
                                .warn(format!("Deleting test mail {} failed: {}", uid, e));
                        }
                    }
                    return Ok(true);
                }
                Verification::Foreign => {
                    if !self.graylisting {
                        self.log
                            .debug(format!("Message {} belongs to another round trip", uid));
                    }
                    self.graylisting = true;
                }
                Verification::Unrelated => {}
            }
        }

        Ok(false)
    }

    fn receive_failure(&self, source: ProviderError) -> ProbeFailure {
        ProbeFailure::Receive {
            server: self.pair.inbound.clone(),
            source,
        }
    }

    /// Hands the diagnostic log to the notifier. Returns whether it was accepted.
    async fn notify(&mut self) -> bool {
        let report = FailureReport::new(self.pair.to_string(), self.log.contents());

        match self.notifier.deliver(&report).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(pair = %self.pair, error = %e, "Failed to deliver failure report");
                false
            }
        }
    }
}
