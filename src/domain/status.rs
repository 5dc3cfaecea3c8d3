//! Status events emitted by round trips.
//!
//! The ordered sequence of events sharing a `group` reconstructs the timeline
//! of one round trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CorrelationId, RoundPair};

/// Progress marker recorded in the status log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// The round trip was started.
    Start,
    /// Handing the test mail to the outbound server.
    StartSendmail,
    /// The outbound server accepted the test mail.
    EndSendmail,
    /// Watching the inbound mailbox.
    StartReceive,
    /// Stopped watching the inbound mailbox.
    EndReceive,
    /// The test mail arrived.
    Success,
    /// The round trip failed.
    Error,
    /// Stale test mails from other round trips were seen.
    Graylisting,
}

impl StatusKind {
    /// Returns the persisted name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Start => "start",
            StatusKind::StartSendmail => "start_sendmail",
            StatusKind::EndSendmail => "end_sendmail",
            StatusKind::StartReceive => "start_receive",
            StatusKind::EndReceive => "end_receive",
            StatusKind::Success => "success",
            StatusKind::Error => "error",
            StatusKind::Graylisting => "graylisting",
        }
    }
}

/// One timestamped record of round trip progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Correlation id of the round trip.
    pub group: String,
    /// Outbound server name.
    pub out: String,
    /// Inbound server name.
    #[serde(rename = "in")]
    pub inbound: String,
    /// What happened.
    pub status: StatusKind,
    /// Seconds since the Unix epoch, fractional.
    pub timestamp: f64,
    /// Additional free-form fields.
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl StatusEvent {
    /// Creates an event stamped with the current time.
    pub fn now(group: &CorrelationId, pair: &RoundPair, status: StatusKind) -> Self {
        Self::at(group, pair, status, Utc::now())
    }

    /// Creates an event stamped with the given time.
    pub fn at(
        group: &CorrelationId,
        pair: &RoundPair,
        status: StatusKind,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            group: group.0.clone(),
            out: pair.out.clone(),
            inbound: pair.inbound.clone(),
            status,
            timestamp: epoch_seconds(at),
            extra: BTreeMap::new(),
        }
    }

    /// Attaches an extra field to the event.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Converts a timestamp to fractional seconds since the Unix epoch.
pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_kind_serialization() {
        let json = serde_json::to_string(&StatusKind::StartSendmail).unwrap();
        assert_eq!(json, "\"start_sendmail\"");

        let kind: StatusKind = serde_json::from_str("\"graylisting\"").unwrap();
        assert_eq!(kind, StatusKind::Graylisting);
    }

    #[test]
    fn status_kind_as_str_matches_serde() {
        for kind in [
            StatusKind::Start,
            StatusKind::StartSendmail,
            StatusKind::EndSendmail,
            StatusKind::StartReceive,
            StatusKind::EndReceive,
            StatusKind::Success,
            StatusKind::Error,
            StatusKind::Graylisting,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn event_fields() {
        let at = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let event = StatusEvent::at(
            &CorrelationId::from("abc123"),
            &RoundPair::new("vps1", "vps2"),
            StatusKind::Start,
            at,
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["group"], "abc123");
        assert_eq!(value["out"], "vps1");
        assert_eq!(value["in"], "vps2");
        assert_eq!(value["status"], "start");
        assert_eq!(value["timestamp"], 1_700_000_000.25);
        assert!(value.get("extra").is_none());
    }

    #[test]
    fn extra_fields_are_flattened() {
        let event = StatusEvent::now(
            &CorrelationId::from("abc123"),
            &RoundPair::new("vps1", "vps2"),
            StatusKind::Error,
        )
        .with_extra("reason", "timeout");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["reason"], "timeout");

        let back: StatusEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.extra.get("reason"), Some(&serde_json::json!("timeout")));
    }
}
