//! Integration tests for the probe pipeline.
//!
//! These tests drive the scheduler, round trips and the status log engine
//! together against in-memory endpoints and check what ends up on disk.
//! Each module contains its own unit tests for detailed logic testing.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mailround::config::{MailCredentials, ServerSettings, Settings};
use mailround::domain::{RoundPair, ServerKind, StatusKind};
use mailround::providers::email::{
    Activity, EndpointRegistry, MailSender, MailboxConnector, MailboxSession, ProbeMessage,
    ProviderError,
};
use mailround::providers::notify::{FailureReport, Notifier, NotifyError};
use mailround::services::{Scheduler, StatusLogEngine};
use mailround::storage::StatusLogDocument;

// ============================================================================
// In-memory endpoints
// ============================================================================

#[derive(Clone, Default)]
struct Inbox {
    messages: Arc<Mutex<BTreeMap<u32, Vec<u8>>>>,
    next_uid: Arc<Mutex<u32>>,
}

impl Inbox {
    fn push(&self, raw: Vec<u8>) {
        let mut uid = self.next_uid.lock().unwrap();
        *uid += 1;
        self.messages.lock().unwrap().insert(*uid, raw);
    }

    fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

struct InboxSender {
    inbox: Option<Inbox>,
}

#[async_trait]
impl MailSender for InboxSender {
    async fn send(&self, message: &ProbeMessage) -> Result<(), ProviderError> {
        match &self.inbox {
            Some(inbox) => {
                inbox.push(message.build()?.formatted());
                Ok(())
            }
            None => Err(ProviderError::Connection("connection refused".to_string())),
        }
    }
}

struct InboxSession {
    inbox: Inbox,
}

#[async_trait]
impl MailboxSession for InboxSession {
    async fn select(&mut self, _folder: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn search_and_fetch(&mut self) -> Result<BTreeMap<u32, Vec<u8>>, ProviderError> {
        Ok(self.inbox.messages.lock().unwrap().clone())
    }

    async fn delete(&mut self, uid: u32) -> Result<(), ProviderError> {
        self.inbox.messages.lock().unwrap().remove(&uid);
        Ok(())
    }

    async fn wait_for_activity(&mut self, timeout: Duration) -> Result<Activity, ProviderError> {
        tokio::time::sleep(timeout).await;
        Ok(Activity::Timeout)
    }

    async fn close(self: Box<Self>) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[async_trait]
impl MailboxConnector for Inbox {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, ProviderError> {
        Ok(Box::new(InboxSession {
            inbox: self.clone(),
        }))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    reports: Mutex<Vec<FailureReport>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, report: &FailureReport) -> Result<(), NotifyError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn server(kind: ServerKind, email: &str) -> ServerSettings {
    ServerSettings {
        kind,
        host: "mail.example.com".to_string(),
        port: if kind == ServerKind::Smtp { 465 } else { 993 },
        use_ssl: true,
        email: email.to_string(),
        credentials: MailCredentials::new("probe", "secret"),
    }
}

fn settings(path: &Path) -> Settings {
    let mut settings = Settings::default();
    settings
        .outbound
        .insert("vps1".to_string(), server(ServerKind::Smtp, "out@example.com"));
    settings
        .inbound
        .insert("vps2".to_string(), server(ServerKind::Imap, "in@example.com"));
    settings.rounds.push(RoundPair::new("vps1", "vps2"));
    settings.max_receive_time = Duration::from_millis(200);
    settings.idle_slice = Duration::from_millis(20);
    settings.replace_grace = Duration::from_millis(20);
    settings.status_log.path = path.to_path_buf();
    settings.status_log.tick = Duration::from_millis(20);
    settings
}

/// Polls the status log until it holds an event of `last` kind.
async fn wait_for_status(path: &Path, last: StatusKind) -> StatusLogDocument {
    for _ in 0..100 {
        if let Ok(bytes) = std::fs::read(path) {
            let document = StatusLogDocument::decode(&bytes).unwrap();
            if document.status.iter().any(|event| event.status == last) {
                return document;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("status log never recorded {:?}", last);
}

fn timeline(document: &StatusLogDocument) -> Vec<StatusKind> {
    document.status.iter().map(|event| event.status).collect()
}

// ============================================================================
// Pipeline Tests
// ============================================================================

#[tokio::test]
async fn successful_round_is_persisted_and_signed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.mrmp");
    let settings = Arc::new(settings(&path));

    let inbox = Inbox::default();
    let registry = EndpointRegistry::new()
        .with_sender(
            "vps1",
            Arc::new(InboxSender {
                inbox: Some(inbox.clone()),
            }),
        )
        .with_mailbox("vps2", Arc::new(inbox.clone()));
    let notifier = Arc::new(RecordingNotifier::default());

    let engine = StatusLogEngine::start(Arc::clone(&settings), None);
    let mut scheduler = Scheduler::new(
        Arc::clone(&settings),
        registry,
        notifier.clone(),
        engine.handle(),
    );

    assert_eq!(scheduler.tick().await, 1);
    scheduler.drain().await;

    let document = wait_for_status(&path, StatusKind::Success).await;
    engine.stop().await;

    assert_eq!(
        timeline(&document),
        vec![
            StatusKind::Start,
            StatusKind::StartSendmail,
            StatusKind::EndSendmail,
            StatusKind::StartReceive,
            StatusKind::EndReceive,
            StatusKind::Success,
        ]
    );
    assert!(document.verify().is_ok());
    assert!(document
        .status
        .iter()
        .all(|event| event.group == document.status[0].group));
    assert_eq!(document.config.server.len(), 2);
    assert_eq!(document.config.server[0].server_name, "vps2");
    assert_eq!(document.config.round.len(), 1);

    assert_eq!(inbox.len(), 0);
    assert!(notifier.reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn send_failure_is_reported_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("data.mrmp");
    let settings = Arc::new(settings(&path));

    let registry = EndpointRegistry::new()
        .with_sender("vps1", Arc::new(InboxSender { inbox: None }))
        .with_mailbox("vps2", Arc::new(Inbox::default()));
    let notifier = Arc::new(RecordingNotifier::default());

    let engine = StatusLogEngine::start(Arc::clone(&settings), None);
    let mut scheduler = Scheduler::new(
        Arc::clone(&settings),
        registry,
        notifier.clone(),
        engine.handle(),
    );

    scheduler.tick().await;
    scheduler.drain().await;

    let document = wait_for_status(&path, StatusKind::Error).await;
    engine.stop().await;

    assert_eq!(
        timeline(&document),
        vec![StatusKind::Start, StatusKind::StartSendmail, StatusKind::Error]
    );
    assert!(document.verify().is_ok());

    let reports = notifier.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].pair_name, "vps1->vps2");
    assert!(reports[0].text().starts_with("*Mailround*\nError between vps1->vps2\n```"));
    assert!(reports[0].detail.contains("connection refused"));
}

#[tokio::test]
async fn tampered_log_is_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.mrmp");
    std::fs::write(&path, b"not messagepack at all").unwrap();
    let settings = Arc::new(settings(&path));

    let inbox = Inbox::default();
    let registry = EndpointRegistry::new()
        .with_sender(
            "vps1",
            Arc::new(InboxSender {
                inbox: Some(inbox.clone()),
            }),
        )
        .with_mailbox("vps2", Arc::new(inbox));
    let notifier = Arc::new(RecordingNotifier::default());

    let engine = StatusLogEngine::start(Arc::clone(&settings), None);
    let mut scheduler = Scheduler::new(
        Arc::clone(&settings),
        registry,
        notifier,
        engine.handle(),
    );

    scheduler.tick().await;
    scheduler.drain().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop().await;

    assert_eq!(std::fs::read(&path).unwrap(), b"not messagepack at all");
}
