//! The signed status log document.
//!
//! The document is persisted as MessagePack. Its `signature` is the SHA-256
//! digest (lowercase hex) of the MessagePack encoding of exactly the `status`
//! and `config` sections, so any change to either section that does not go
//! through [`StatusLogDocument::encode`] is detected on the next read.
//!
//! Both sections are hashed in their generic value form. On read the digest
//! is taken over the sections as decoded from disk, so keys the typed model
//! does not know about still count.

use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::schema;
use super::{CorruptionReason, StatusLogError};
use crate::config::Settings;
use crate::domain::{ServerKind, StatusEvent};

/// Version string written into every document.
pub const STATUS_LOG_VERSION: &str = "1.0.0";

/// Snapshot of one configured server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    /// Protocol of the server.
    pub server_type: ServerKind,
    /// Hostname.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Implicit TLS.
    pub use_ssl: bool,
    /// Configured server name.
    pub server_name: String,
    /// When this exact entry first appeared, seconds since the epoch.
    pub valid_at: f64,
}

impl ServerSnapshot {
    fn same_server(&self, other: &ServerSnapshot) -> bool {
        self.server_type == other.server_type
            && self.host == other.host
            && self.port == other.port
            && self.use_ssl == other.use_ssl
            && self.server_name == other.server_name
    }
}

/// Snapshot of one monitored pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Inbound server name.
    #[serde(rename = "in")]
    pub inbound: String,
    /// Outbound server name.
    pub out: String,
    /// When this pair first appeared, seconds since the epoch.
    pub timestamp: f64,
}

/// The `config` section of the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Configured servers, inbound first.
    pub server: Vec<ServerSnapshot>,
    /// Monitored pairs.
    pub round: Vec<RoundSnapshot>,
}

impl ConfigSnapshot {
    /// Replaces the snapshot with the live configuration.
    ///
    /// Entries that are unchanged since the previous snapshot keep their
    /// original timestamps; everything else is stamped with `now`.
    pub fn refresh(&mut self, settings: &Settings, now: f64) {
        let servers = settings
            .inbound
            .iter()
            .chain(settings.outbound.iter())
            .map(|(name, server)| {
                let mut entry = ServerSnapshot {
                    server_type: server.kind,
                    host: server.host.clone(),
                    port: server.port,
                    use_ssl: server.use_ssl,
                    server_name: name.clone(),
                    valid_at: now,
                };
                if let Some(previous) = self.server.iter().find(|p| p.same_server(&entry)) {
                    entry.valid_at = previous.valid_at;
                }
                entry
            })
            .collect();

        let rounds = settings
            .rounds
            .iter()
            .map(|pair| {
                let timestamp = self
                    .round
                    .iter()
                    .find(|r| r.out == pair.out && r.inbound == pair.inbound)
                    .map(|r| r.timestamp)
                    .unwrap_or(now);
                RoundSnapshot {
                    inbound: pair.inbound.clone(),
                    out: pair.out.clone(),
                    timestamp,
                }
            })
            .collect();

        self.server = servers;
        self.round = rounds;
    }
}

/// The persisted status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLogDocument {
    /// Format version, always [`STATUS_LOG_VERSION`] when written.
    pub version: String,
    /// Status events in arrival order.
    pub status: Vec<StatusEvent>,
    /// Configuration snapshot.
    pub config: ConfigSnapshot,
    /// Hex SHA-256 over `status` and `config`.
    pub signature: String,
}

/// The signed part of the document, borrowed for hashing.
#[derive(Serialize)]
struct SignedSections<'a> {
    status: &'a [StatusEvent],
    config: &'a ConfigSnapshot,
}

impl Default for StatusLogDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLogDocument {
    /// Creates an empty, unsigned document.
    pub fn new() -> Self {
        Self {
            version: STATUS_LOG_VERSION.to_string(),
            status: Vec::new(),
            config: ConfigSnapshot::default(),
            signature: String::new(),
        }
    }

    /// Computes the signature over the current `status` and `config`.
    pub fn compute_signature(&self) -> Result<String, StatusLogError> {
        let sections = serde_json::to_value(SignedSections {
            status: &self.status,
            config: &self.config,
        })?;
        signature_of(&sections)
    }

    /// Recomputes and stores the signature.
    pub fn sign(&mut self) -> Result<(), StatusLogError> {
        self.signature = self.compute_signature()?;
        Ok(())
    }

    /// Checks version and signature.
    pub fn verify(&self) -> Result<(), StatusLogError> {
        if self.version != STATUS_LOG_VERSION {
            return Err(CorruptionReason::Version(self.version.clone()).into());
        }

        let expected = self.compute_signature()?;
        if self.signature != expected {
            return Err(CorruptionReason::Signature {
                stored: self.signature.clone(),
                computed: expected,
            }
            .into());
        }

        Ok(())
    }

    /// Signs the document and encodes it as MessagePack.
    pub fn encode(&mut self) -> Result<Vec<u8>, StatusLogError> {
        self.sign()?;
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decodes a persisted document and runs the full integrity check.
    pub fn decode(bytes: &[u8]) -> Result<Self, StatusLogError> {
        let value: serde_json::Value = rmp_serde::from_slice(bytes)
            .map_err(|e| CorruptionReason::Undecodable(e.to_string()))?;

        match value.get("version").and_then(|v| v.as_str()) {
            Some(STATUS_LOG_VERSION) => {}
            Some(other) => return Err(CorruptionReason::Version(other.to_string()).into()),
            None => return Err(CorruptionReason::Schema("missing version".to_string()).into()),
        }

        schema::validate(&value)?;

        let stored = value
            .get("signature")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let computed = signature_of(&json!({
            "status": value.get("status").cloned().unwrap_or(Value::Null),
            "config": value.get("config").cloned().unwrap_or(Value::Null),
        }))?;
        if stored != computed {
            return Err(CorruptionReason::Signature { stored, computed }.into());
        }

        serde_json::from_value(value)
            .map_err(|e| CorruptionReason::Schema(e.to_string()).into())
    }
}

/// Hex SHA-256 over the MessagePack encoding of the signed sections.
fn signature_of(sections: &Value) -> Result<String, StatusLogError> {
    let bytes = rmp_serde::to_vec_named(sections)?;
    Ok(hex::encode(digest(&SHA256, &bytes)))
}
