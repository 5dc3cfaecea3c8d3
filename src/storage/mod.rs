//! Status log persistence.
//!
//! This module provides the storage layer for the probe:
//!
//! - The signed, versioned status log document
//! - The JSON schema every persisted document must satisfy
//! - Atomic reads and writes of the document file

mod document;
mod schema;
mod status_file;

pub use document::{
    ConfigSnapshot, RoundSnapshot, ServerSnapshot, StatusLogDocument, STATUS_LOG_VERSION,
};
pub use schema::STATUS_LOG_SCHEMA;
pub use status_file::StatusLogFile;

use thiserror::Error;

/// Why a persisted document was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptionReason {
    #[error("not a MessagePack document: {0}")]
    Undecodable(String),

    #[error("unsupported version {0:?}")]
    Version(String),

    #[error("signature mismatch, stored {stored} computed {computed}")]
    Signature { stored: String, computed: String },

    #[error("schema violation: {0}")]
    Schema(String),
}

/// Errors that can occur while reading or writing the status log.
#[derive(Debug, Error)]
pub enum StatusLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Status log corrupt: {0}")]
    Corrupt(#[from] CorruptionReason),

    #[error("Schema unavailable: {0}")]
    Schema(String),
}

impl StatusLogError {
    /// Returns whether the error stems from the persisted document itself.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StatusLogError::Corrupt(_))
    }
}

/// Result type for status log operations.
pub type Result<T> = std::result::Result<T, StatusLogError>;
