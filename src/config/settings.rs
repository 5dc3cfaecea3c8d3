//! Probe settings and configuration types.
//!
//! Settings are loaded once at startup (see [`Settings::from_env`]) and are
//! read-only afterwards; every component receives them behind an `Arc`.

use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{RoundPair, ServerKind};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A server definition lacks a required setting.
    #[error("server {server} is missing setting {setting}")]
    MissingSetting { server: String, setting: &'static str },

    /// A value could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    /// The same server name was defined twice for one direction.
    #[error("server {0} is defined more than once")]
    DuplicateServer(String),

    /// A round definition could not be parsed.
    #[error("invalid round definition {0:?}, expected out:in")]
    InvalidRound(String),

    /// A round references a server that is not configured.
    #[error("round {round} references unknown {direction} server {server}")]
    UnknownServer {
        round: String,
        direction: &'static str,
        server: String,
    },

    /// POP mailboxes cannot be polled.
    #[error("round {round} uses POP server {server}, POP polling is not supported")]
    PopUnsupported { round: String, server: String },

    /// Nothing to monitor.
    #[error("nothing to do, no rounds configured")]
    NoRounds,

    /// The env file could not be read.
    #[error("failed to load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
}

/// Mailbox login credentials.
#[derive(Debug, Clone)]
pub struct MailCredentials {
    /// Login name.
    pub username: String,
    password: SecretString,
}

impl MailCredentials {
    /// Creates credentials from a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Returns the password (exposes the secret).
    pub(crate) fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Connection settings for one mail server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Protocol spoken by the server.
    pub kind: ServerKind,
    /// Hostname.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Implicit TLS (true) or STARTTLS (false).
    pub use_ssl: bool,
    /// Mailbox address used as sender or recipient of the test mail.
    pub email: String,
    /// Login credentials.
    pub credentials: MailCredentials,
}

/// Status log engine settings.
#[derive(Debug, Clone)]
pub struct StatusLogSettings {
    /// Location of the persisted document.
    pub path: PathBuf,
    /// How often the writer wakes up.
    pub tick: Duration,
    /// Upper bound of events persisted per cycle.
    pub max_events_per_cycle: usize,
    /// Consecutive integrity failures before an alert is delivered.
    pub corruption_alert_threshold: u32,
}

impl Default for StatusLogSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data.mrmp"),
            tick: Duration::from_secs(1),
            max_events_per_cycle: 10,
            corruption_alert_threshold: 3,
        }
    }
}

/// Top-level probe settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Inbound mailboxes keyed by server name.
    pub inbound: BTreeMap<String, ServerSettings>,
    /// Outbound relays keyed by server name.
    pub outbound: BTreeMap<String, ServerSettings>,
    /// Monitored pairs, in definition order.
    pub rounds: Vec<RoundPair>,
    /// Interval between two rounds for the same pair.
    pub check_interval: Duration,
    /// Upper bound for waiting on the test mail.
    pub max_receive_time: Duration,
    /// Longest single IDLE wait before the mailbox is searched again.
    pub idle_slice: Duration,
    /// Time the scheduler waits for a still running round before skipping it.
    pub replace_grace: Duration,
    /// Webhook receiving failure reports.
    pub webhook_url: Option<String>,
    /// Delete matched test mails.
    pub cleanup: bool,
    /// Capture DEBUG lines in failure reports.
    pub debug: bool,
    /// Status log configuration.
    pub status_log: StatusLogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            inbound: BTreeMap::new(),
            outbound: BTreeMap::new(),
            rounds: Vec::new(),
            check_interval: Duration::from_secs(15 * 60),
            max_receive_time: Duration::from_secs(10),
            idle_slice: Duration::from_secs(30),
            replace_grace: Duration::from_secs(2),
            webhook_url: None,
            cleanup: true,
            debug: false,
            status_log: StatusLogSettings::default(),
        }
    }
}

/// Upper bound for the check interval and the receive time.
const MAX_DURATION_SETTING: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn check_duration(key: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() || value > MAX_DURATION_SETTING {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.as_secs().to_string(),
        });
    }
    Ok(())
}

impl Settings {
    /// Checks that every round can actually be executed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_duration("MAILROUND_CHECK_INTERVAL", self.check_interval)?;
        check_duration("MAILROUND_MAX_MAIL_RECEIVE_TIME", self.max_receive_time)?;

        if self.rounds.is_empty() {
            return Err(ConfigError::NoRounds);
        }

        for round in &self.rounds {
            if !self.outbound.contains_key(&round.out) {
                return Err(ConfigError::UnknownServer {
                    round: round.to_string(),
                    direction: "outbound",
                    server: round.out.clone(),
                });
            }

            match self.inbound.get(&round.inbound) {
                None => {
                    return Err(ConfigError::UnknownServer {
                        round: round.to_string(),
                        direction: "inbound",
                        server: round.inbound.clone(),
                    })
                }
                Some(server) if server.kind == ServerKind::Pop => {
                    return Err(ConfigError::PopUnsupported {
                        round: round.to_string(),
                        server: round.inbound.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}
