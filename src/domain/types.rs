//! Core identifier types for the probe.
//!
//! These newtype wrappers keep correlation ids and pair names from being
//! mixed up with the many other strings flowing through a round trip.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Token embedded in a test message to tie it to exactly one round trip.
///
/// Rendered as 32 lowercase hex characters (a v4 UUID without dashes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Generates a fresh random 128-bit correlation id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A monitored (outbound, inbound) server pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoundPair {
    /// Name of the outbound (SMTP) server.
    pub out: String,
    /// Name of the inbound (IMAP) server.
    #[serde(rename = "in")]
    pub inbound: String,
}

impl RoundPair {
    /// Creates a pair from server names.
    pub fn new(out: impl Into<String>, inbound: impl Into<String>) -> Self {
        Self {
            out: out.into(),
            inbound: inbound.into(),
        }
    }
}

/// Formats as `out->in`, the name used in notifications and task registries.
impl fmt::Display for RoundPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.out, self.inbound)
    }
}
