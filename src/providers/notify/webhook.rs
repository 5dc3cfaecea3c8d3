//! Webhook and log-only notifiers.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{FailureReport, Notifier, NotifyError, Result};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct WebhookPayload {
    text: String,
}

/// Posts reports as `{"text": ...}` JSON, the format understood by Slack
/// and Mattermost incoming webhooks.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Creates a notifier with a client bounded by a 30 second timeout.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Overrides the HTTP client (useful for custom timeouts or proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, report: &FailureReport) -> Result<()> {
        let payload = WebhookPayload {
            text: report.text(),
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(pair = %report.pair_name, "Failure report delivered");
        Ok(())
    }
}

/// Writes reports to the process log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, report: &FailureReport) -> Result<()> {
        tracing::warn!(pair = %report.pair_name, detail = %report.detail, "Round trip failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one HTTP request, answers with `status` and returns the raw request.
    async fn one_shot_server(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8(request).unwrap()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn posts_json_payload() {
        let (url, server) = one_shot_server("200 OK").await;
        let notifier = WebhookNotifier::new(url).unwrap();

        notifier
            .deliver(&FailureReport::new("vps1->vps2", "send failed"))
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));

        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            json["text"],
            "*Mailround*\nError between vps1->vps2\n```send failed```"
        );
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, server) = one_shot_server("500 Internal Server Error").await;
        let notifier = WebhookNotifier::new(url).unwrap();

        let result = notifier
            .deliver(&FailureReport::new("vps1->vps2", "boom"))
            .await;
        server.await.unwrap();

        assert!(matches!(result, Err(NotifyError::Rejected { status: 500, .. })));
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);

        let notifier = WebhookNotifier::new(url).unwrap();
        let result = notifier
            .deliver(&FailureReport::new("vps1->vps2", "boom"))
            .await;

        assert!(matches!(result, Err(NotifyError::Http(_))));
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        assert!(LogNotifier
            .deliver(&FailureReport::new("vps1->vps2", "boom"))
            .await
            .is_ok());
    }
}
