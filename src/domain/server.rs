//! Mail server kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol spoken by a configured mail server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerKind {
    /// Inbound IMAP mailbox.
    Imap,
    /// Inbound POP3 mailbox. Accepted in configuration but never polled.
    Pop,
    /// Outbound SMTP relay.
    Smtp,
    /// Anything else found in a persisted snapshot.
    Unknown,
}

impl ServerKind {
    /// Returns whether this kind receives mail.
    pub fn is_inbound(&self) -> bool {
        matches!(self, ServerKind::Imap | ServerKind::Pop)
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerKind::Imap => "IMAP",
            ServerKind::Pop => "POP",
            ServerKind::Smtp => "SMTP",
            ServerKind::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_kind_serialization() {
        assert_eq!(serde_json::to_string(&ServerKind::Imap).unwrap(), "\"IMAP\"");
        assert_eq!(serde_json::to_string(&ServerKind::Smtp).unwrap(), "\"SMTP\"");

        let kind: ServerKind = serde_json::from_str("\"UNKNOWN\"").unwrap();
        assert_eq!(kind, ServerKind::Unknown);
    }

    #[test]
    fn inbound_kinds() {
        assert!(ServerKind::Imap.is_inbound());
        assert!(ServerKind::Pop.is_inbound());
        assert!(!ServerKind::Smtp.is_inbound());
    }
}
