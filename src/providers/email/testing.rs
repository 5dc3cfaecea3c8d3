//! In-memory mail endpoints for unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    Activity, MailSender, MailboxConnector, MailboxSession, ProbeMessage, ProviderError, Result,
};

#[derive(Default)]
struct MailboxState {
    inbox: BTreeMap<u32, Vec<u8>>,
    in_flight: Vec<Vec<u8>>,
    next_uid: u32,
    deleted: Vec<u32>,
    opened: usize,
    closed: usize,
    fail_connect: Option<String>,
    fail_search: Option<String>,
    hang_on_wait: bool,
}

impl MailboxState {
    fn store(&mut self, raw: Vec<u8>) -> u32 {
        self.next_uid += 1;
        self.inbox.insert(self.next_uid, raw);
        self.next_uid
    }
}

/// A mailbox shared between a [`FakeSender`] and the sessions it hands out.
///
/// Sent mail is held "in flight" until a session waits for activity, which
/// mimics a server pushing an IDLE notification.
#[derive(Clone, Default)]
pub struct FakeMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a message directly in the inbox.
    pub fn deliver(&self, raw: impl Into<Vec<u8>>) -> u32 {
        self.state.lock().unwrap().store(raw.into())
    }

    /// Queues a message that shows up on the next wait.
    pub fn deliver_later(&self, raw: impl Into<Vec<u8>>) {
        self.state.lock().unwrap().in_flight.push(raw.into());
    }

    pub fn fail_connect(&self, reason: &str) {
        self.state.lock().unwrap().fail_connect = Some(reason.to_string());
    }

    pub fn fail_search(&self, reason: &str) {
        self.state.lock().unwrap().fail_search = Some(reason.to_string());
    }

    /// Makes every wait block forever, like a server that stops answering.
    pub fn hang_on_wait(&self) {
        self.state.lock().unwrap().hang_on_wait = true;
    }

    pub fn message_count(&self) -> usize {
        self.state.lock().unwrap().inbox.len()
    }

    pub fn deleted(&self) -> Vec<u32> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Returns (sessions opened, sessions closed).
    pub fn sessions(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.opened, state.closed)
    }
}

#[async_trait]
impl MailboxConnector for FakeMailbox {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.fail_connect {
            return Err(ProviderError::Authentication(reason.clone()));
        }
        state.opened += 1;

        Ok(Box::new(FakeSession {
            mailbox: self.clone(),
            selected: false,
        }))
    }
}

struct FakeSession {
    mailbox: FakeMailbox,
    selected: bool,
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn select(&mut self, folder: &str) -> Result<()> {
        if folder != "INBOX" {
            return Err(ProviderError::Protocol(format!("no such folder {}", folder)));
        }
        self.selected = true;
        Ok(())
    }

    async fn search_and_fetch(&mut self) -> Result<BTreeMap<u32, Vec<u8>>> {
        if !self.selected {
            return Err(ProviderError::Protocol("no folder selected".to_string()));
        }

        let state = self.mailbox.state.lock().unwrap();
        if let Some(reason) = &state.fail_search {
            return Err(ProviderError::Connection(reason.clone()));
        }
        Ok(state.inbox.clone())
    }

    async fn delete(&mut self, uid: u32) -> Result<()> {
        let mut state = self.mailbox.state.lock().unwrap();
        state.inbox.remove(&uid);
        state.deleted.push(uid);
        Ok(())
    }

    async fn wait_for_activity(&mut self, timeout: Duration) -> Result<Activity> {
        let (arrived, hang) = {
            let mut state = self.mailbox.state.lock().unwrap();
            let in_flight = std::mem::take(&mut state.in_flight);
            let arrived = !in_flight.is_empty();
            for raw in in_flight {
                state.store(raw);
            }
            (arrived, state.hang_on_wait)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if arrived {
            Ok(Activity::NewData)
        } else {
            tokio::time::sleep(timeout).await;
            Ok(Activity::Timeout)
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.mailbox.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// How a [`FakeSender`] treats sent mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message is in the inbox before `send` returns.
    Immediate,
    /// The message arrives on the next wait.
    Delayed,
    /// The message is accepted and lost.
    Lost,
}

/// Sender that drops the formatted message into a [`FakeMailbox`].
pub struct FakeSender {
    mailbox: FakeMailbox,
    delivery: Delivery,
    failure: Option<String>,
    sent: Mutex<Vec<ProbeMessage>>,
}

impl FakeSender {
    pub fn new(mailbox: FakeMailbox, delivery: Delivery) -> Self {
        Self {
            mailbox,
            delivery,
            failure: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            mailbox: FakeMailbox::new(),
            delivery: Delivery::Lost,
            failure: Some(reason.to_string()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<ProbeMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailSender for FakeSender {
    async fn send(&self, message: &ProbeMessage) -> Result<()> {
        if let Some(reason) = &self.failure {
            return Err(ProviderError::Connection(reason.clone()));
        }

        let raw = message.build()?.formatted();
        self.sent.lock().unwrap().push(message.clone());

        match self.delivery {
            Delivery::Immediate => {
                self.mailbox.deliver(raw);
            }
            Delivery::Delayed => self.mailbox.deliver_later(raw),
            Delivery::Lost => {}
        }
        Ok(())
    }
}

/// Raw message carrying the given correlation header value.
pub fn tagged_message(correlation: &str) -> Vec<u8> {
    format!(
        "From: out@example.com\r\nTo: in@example.com\r\nSubject: [MailRound]\r\nX-Mail-Round: {}\r\n\r\nbody\r\n",
        correlation
    )
    .into_bytes()
}

/// Raw message without a correlation header.
pub fn plain_message() -> Vec<u8> {
    b"From: someone@example.com\r\nTo: in@example.com\r\nSubject: hello\r\n\r\nhi\r\n".to_vec()
}
