//! JSON schema for the persisted status log.
//!
//! The document is decoded from MessagePack into a generic value and checked
//! against this schema before it is deserialized into typed structs.

use std::sync::OnceLock;

use jsonschema::Validator;

use super::{CorruptionReason, StatusLogError};

/// Schema of the status log document.
pub const STATUS_LOG_SCHEMA: &str = r#"
{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "title": "mailround status log",
  "type": "object",
  "required": ["version", "status", "config", "signature"],
  "properties": {
    "version": { "type": "string", "const": "1.0.0" },
    "signature": { "type": "string", "pattern": "^[0-9a-f]{64}$" },
    "status": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["group", "out", "in", "status", "timestamp"],
        "properties": {
          "group": { "type": "string", "minLength": 1 },
          "out": { "type": "string" },
          "in": { "type": "string" },
          "status": {
            "enum": [
              "start",
              "start_sendmail",
              "end_sendmail",
              "start_receive",
              "end_receive",
              "success",
              "error",
              "graylisting"
            ]
          },
          "timestamp": { "type": "number" }
        }
      }
    },
    "config": {
      "type": "object",
      "required": ["server", "round"],
      "properties": {
        "server": {
          "type": "array",
          "items": {
            "type": "object",
            "required": ["server_type", "host", "port", "use_ssl", "server_name", "valid_at"],
            "properties": {
              "server_type": { "enum": ["IMAP", "POP", "SMTP", "UNKNOWN"] },
              "host": { "type": "string" },
              "port": { "type": "integer", "minimum": 0, "maximum": 65535 },
              "use_ssl": { "type": "boolean" },
              "server_name": { "type": "string" },
              "valid_at": { "type": "number" }
            }
          }
        },
        "round": {
          "type": "array",
          "items": {
            "type": "object",
            "required": ["in", "out", "timestamp"],
            "properties": {
              "in": { "type": "string" },
              "out": { "type": "string" },
              "timestamp": { "type": "number" }
            }
          }
        }
      }
    }
  }
}
"#;

static VALIDATOR: OnceLock<Result<Validator, String>> = OnceLock::new();

fn validator() -> Result<&'static Validator, StatusLogError> {
    VALIDATOR
        .get_or_init(|| {
            let schema: serde_json::Value =
                serde_json::from_str(STATUS_LOG_SCHEMA).map_err(|e| e.to_string())?;
            jsonschema::validator_for(&schema).map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| StatusLogError::Schema(e.clone()))
}

/// Validates a decoded document against [`STATUS_LOG_SCHEMA`].
///
/// All violations are joined into a single corruption reason.
pub fn validate(document: &serde_json::Value) -> Result<(), StatusLogError> {
    let errors: Vec<String> = validator()?
        .iter_errors(document)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CorruptionReason::Schema(errors.join("; ")).into())
    }
}
