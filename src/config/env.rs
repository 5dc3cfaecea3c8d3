//! Environment variable loading.
//!
//! Every setting is read from a `MAILROUND_` prefixed variable. Servers are
//! declared with one variable per field:
//!
//! ```text
//! MAILROUND_OUT_SMTP_VPS1_HOST=smtp.example.com
//! MAILROUND_OUT_SMTP_VPS1_PORT=465
//! MAILROUND_OUT_SMTP_VPS1_USE_SSL=yes
//! MAILROUND_OUT_SMTP_VPS1_EMAIL=probe@example.com
//! MAILROUND_OUT_SMTP_VPS1_USERNAME=probe
//! MAILROUND_OUT_SMTP_VPS1_PASSWORD=secret
//! MAILROUND_IN_IMAP_VPS2_HOST=imap.example.net
//! ...
//! MAILROUND_ROUND=VPS1:VPS2
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::settings::{ConfigError, MailCredentials, ServerSettings, Settings};
use crate::domain::{RoundPair, ServerKind};

const PREFIX: &str = "MAILROUND_";

const SERVER_PREFIXES: [(&str, ServerKind); 3] = [
    ("IN_IMAP_", ServerKind::Imap),
    ("IN_POP_", ServerKind::Pop),
    ("OUT_SMTP_", ServerKind::Smtp),
];

const SERVER_FIELDS: [&str; 6] = ["USE_SSL", "USERNAME", "PASSWORD", "EMAIL", "HOST", "PORT"];

/// Parses the boolean spellings accepted in configuration.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "ja" | "j" | "wahr" | "w"
    )
}

#[derive(Default)]
struct PartialServer {
    fields: BTreeMap<&'static str, String>,
}

impl PartialServer {
    fn take(&mut self, server: &str, field: &'static str) -> Result<String, ConfigError> {
        self.fields
            .remove(field)
            .ok_or_else(|| ConfigError::MissingSetting {
                server: server.to_string(),
                setting: field,
            })
    }

    fn build(mut self, name: &str, kind: ServerKind) -> Result<ServerSettings, ConfigError> {
        let host = self.take(name, "HOST")?;
        let port_raw = self.take(name, "PORT")?;
        let port = port_raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: format!("{}_PORT", name),
            value: port_raw.clone(),
        })?;
        let email = self.take(name, "EMAIL")?;
        let username = self.take(name, "USERNAME")?;
        let password = self.take(name, "PASSWORD")?;
        let use_ssl = self
            .fields
            .remove("USE_SSL")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        Ok(ServerSettings {
            kind,
            host,
            port,
            use_ssl,
            email,
            credentials: MailCredentials::new(username, password),
        })
    }
}

/// Splits `IN_IMAP_<NAME>_<FIELD>` into its parts.
fn split_server_key(key: &str) -> Option<(ServerKind, &str, &'static str)> {
    let (rest, kind) = SERVER_PREFIXES
        .iter()
        .find_map(|(prefix, kind)| key.strip_prefix(prefix).map(|rest| (rest, *kind)))?;

    SERVER_FIELDS.iter().find_map(|field| {
        let name = rest.strip_suffix(field)?.strip_suffix('_')?;
        (!name.is_empty()).then_some((kind, name, *field))
    })
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Parses `out:in;out:in` into round pairs, dropping duplicates.
pub fn parse_rounds(value: &str) -> Result<Vec<RoundPair>, ConfigError> {
    let mut rounds: Vec<RoundPair> = Vec::new();
    for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (out, inbound) = entry
            .split_once(':')
            .map(|(o, i)| (o.trim(), i.trim()))
            .filter(|(o, i)| !o.is_empty() && !i.is_empty())
            .ok_or_else(|| ConfigError::InvalidRound(entry.to_string()))?;

        let pair = RoundPair::new(out, inbound);
        if !rounds.contains(&pair) {
            rounds.push(pair);
        }
    }
    Ok(rounds)
}

impl Settings {
    /// Loads settings from the process environment.
    ///
    /// Variables from `env_file` (or `.env` in the working directory when no
    /// file is given) are merged in first; variables already set in the
    /// environment take precedence.
    pub fn from_env(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path)?;
            }
            None => {
                if let Err(e) = dotenvy::dotenv() {
                    if !e.not_found() {
                        return Err(e.into());
                    }
                }
            }
        }

        Self::from_vars(std::env::vars())
    }

    /// Builds settings from an iterator of `(key, value)` pairs.
    ///
    /// Keys without the `MAILROUND_` prefix are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut settings = Settings::default();
        let mut servers: BTreeMap<(ServerKind, String), PartialServer> = BTreeMap::new();

        for (key, value) in vars {
            let key = key.as_ref();
            let Some(name) = key.strip_prefix(PREFIX) else {
                continue;
            };
            let value: String = value.into();

            match name {
                "ROUND" => settings.rounds = parse_rounds(&value)?,
                "CHECK_INTERVAL" => settings.check_interval = parse_seconds(key, &value)?,
                "MAX_MAIL_RECEIVE_TIME" => {
                    settings.max_receive_time = parse_seconds(key, &value)?
                }
                "WEBHOOK_URL" => {
                    let url = value.trim();
                    settings.webhook_url = (!url.is_empty()).then(|| url.to_string());
                }
                "CLEANUP" => settings.cleanup = parse_bool(&value),
                "DEBUG" => settings.debug = parse_bool(&value),
                "STATUS_LOG_PATH" => settings.status_log.path = PathBuf::from(value),
                other => match split_server_key(other) {
                    Some((kind, server, field)) => {
                        servers
                            .entry((kind, server.to_string()))
                            .or_default()
                            .fields
                            .insert(field, value);
                    }
                    None => tracing::debug!(key, "ignoring unknown setting"),
                },
            }
        }

        for ((kind, name), partial) in servers {
            let server = partial.build(&name, kind)?;
            let target = if kind.is_inbound() {
                &mut settings.inbound
            } else {
                &mut settings.outbound
            };
            if target.insert(name.clone(), server).is_some() {
                return Err(ConfigError::DuplicateServer(name));
            }
        }

        Ok(settings)
    }
}
