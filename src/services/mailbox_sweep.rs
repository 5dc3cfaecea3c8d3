//! Removal of leftover test mails.

use mailparse::MailHeaderMap;

use crate::providers::email::{MailboxConnector, ProviderError, Result, MAIL_ROUND_HEADER};

use super::round_trip::INBOX;

/// Deletes every message carrying an `X-Mail-Round` header from a mailbox.
///
/// Messages without the header are left alone. Returns the number of
/// deleted messages.
pub async fn sweep_mailbox(name: &str, connector: &dyn MailboxConnector) -> Result<usize> {
    let mut session = connector.connect().await?;

    let result = async {
        session.select(INBOX).await?;
        let messages = session.search_and_fetch().await?;

        let mut deleted = 0;
        for (uid, raw) in messages {
            if is_test_mail(&raw) {
                session.delete(uid).await?;
                deleted += 1;
            }
        }
        Ok::<_, ProviderError>(deleted)
    }
    .await;

    if let Err(e) = session.close().await {
        tracing::warn!(mailbox = name, error = %e, "Closing mailbox failed");
    }

    if let Ok(deleted) = &result {
        tracing::info!(mailbox = name, deleted, "Mailbox swept");
    }
    result
}

fn is_test_mail(raw: &[u8]) -> bool {
    mailparse::parse_headers(raw)
        .map(|(headers, _)| headers.get_first_header(MAIL_ROUND_HEADER).is_some())
        .unwrap_or(false)
}
