//! Status log engine.
//!
//! Round trips push [`StatusEvent`]s through a cloneable [`StatusLog`] handle.
//! A single background worker owns the file: on every tick it loads and
//! verifies the persisted document, refreshes the configuration snapshot,
//! appends a bounded batch of queued events and rewrites the signed document.
//!
//! A cycle that fails for any reason leaves its events queued for the next
//! tick. Repeated integrity failures raise one alert through the notifier.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Settings;
use crate::domain::{epoch_seconds, CorrelationId, RoundPair, StatusEvent, StatusKind};
use crate::providers::notify::{FailureReport, Notifier};
use crate::storage::{StatusLogError, StatusLogFile};

/// Pair name used for status log alerts.
pub const STATUS_LOG_ALERT_NAME: &str = "status-log";

/// Extra time granted to an in-flight cycle when stopping.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Producer handle of the status log.
///
/// Recording never blocks. Events from one handle keep their order.
#[derive(Debug, Clone)]
pub struct StatusLog {
    sender: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusLog {
    /// Creates a handle together with the receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queues an event for persistence.
    pub fn record(&self, event: StatusEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::warn!(
                group = %e.0.group,
                status = e.0.status.as_str(),
                "Status log is stopped, event dropped"
            );
        }
    }

    /// Queues a plain status event stamped with the current time.
    pub fn add_status(&self, group: &CorrelationId, pair: &RoundPair, status: StatusKind) {
        self.record(StatusEvent::now(group, pair, status));
    }
}

/// The single writer of the status log file.
pub struct StatusWriter {
    file: StatusLogFile,
    settings: Arc<Settings>,
    receiver: mpsc::UnboundedReceiver<StatusEvent>,
    backlog: VecDeque<StatusEvent>,
    notifier: Option<Arc<dyn Notifier>>,
    consecutive_corruptions: u32,
    alerted: bool,
}

impl StatusWriter {
    pub fn new(
        settings: Arc<Settings>,
        receiver: mpsc::UnboundedReceiver<StatusEvent>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            file: StatusLogFile::new(settings.status_log.path.clone()),
            settings,
            receiver,
            backlog: VecDeque::new(),
            notifier,
            consecutive_corruptions: 0,
            alerted: false,
        }
    }

    /// Number of events waiting to be persisted.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn consecutive_corruptions(&self) -> u32 {
        self.consecutive_corruptions
    }

    /// Runs one read-verify-update-write cycle.
    ///
    /// Returns the number of events persisted. Queued events are only
    /// removed from the backlog after the document was written.
    pub async fn run_cycle(&mut self) -> Result<usize, StatusLogError> {
        while let Ok(event) = self.receiver.try_recv() {
            self.backlog.push_back(event);
        }

        if self.backlog.is_empty() {
            return Ok(0);
        }

        let mut document = self.file.load().await?;
        document
            .config
            .refresh(&self.settings, epoch_seconds(Utc::now()));

        let count = self
            .backlog
            .len()
            .min(self.settings.status_log.max_events_per_cycle);
        document
            .status
            .extend(self.backlog.iter().take(count).cloned());

        self.file.store(&mut document).await?;
        self.backlog.drain(..count);

        Ok(count)
    }

    /// Runs a cycle and handles its outcome.
    pub async fn tick(&mut self) {
        match self.run_cycle().await {
            Ok(0) => {}
            Ok(written) => {
                tracing::debug!(
                    written,
                    pending = self.backlog.len(),
                    "Status log updated"
                );
                if self.consecutive_corruptions > 0 {
                    tracing::info!(
                        after = self.consecutive_corruptions,
                        "Status log integrity restored"
                    );
                }
                self.consecutive_corruptions = 0;
                self.alerted = false;
            }
            Err(e) if e.is_corruption() => {
                self.consecutive_corruptions += 1;
                tracing::error!(
                    path = %self.file.path().display(),
                    error = %e,
                    consecutive = self.consecutive_corruptions,
                    pending = self.backlog.len(),
                    "Status log failed integrity check, nothing written"
                );
                self.alert_if_due(&e).await;
            }
            Err(e) => {
                tracing::error!(
                    path = %self.file.path().display(),
                    error = %e,
                    pending = self.backlog.len(),
                    "Status log cycle failed"
                );
            }
        }
    }

    async fn alert_if_due(&mut self, error: &StatusLogError) {
        let threshold = self.settings.status_log.corruption_alert_threshold;
        if self.alerted || threshold == 0 || self.consecutive_corruptions < threshold {
            return;
        }
        self.alerted = true;

        let Some(notifier) = &self.notifier else {
            return;
        };

        let report = FailureReport::new(
            STATUS_LOG_ALERT_NAME,
            format!(
                "Status log {} failed its integrity check {} times in a row, {} events are waiting: {}",
                self.file.path().display(),
                self.consecutive_corruptions,
                self.backlog.len(),
                error
            ),
        );
        if let Err(e) = notifier.deliver(&report).await {
            tracing::error!(error = %e, "Failed to deliver status log alert");
        }
    }

    async fn run(mut self, tick: Duration, stop_flag: Arc<AtomicBool>) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let stopping = stop_flag.load(Ordering::SeqCst);
            self.tick().await;
            if stopping {
                break;
            }
        }

        tracing::info!(pending = self.backlog.len(), "Status log writer stopped");
    }
}

/// Owns the background writer and hands out [`StatusLog`] handles.
pub struct StatusLogEngine {
    handle: StatusLog,
    stop_flag: Arc<AtomicBool>,
    worker: JoinHandle<()>,
    tick: Duration,
}

impl StatusLogEngine {
    /// Spawns the writer on the current runtime.
    pub fn start(settings: Arc<Settings>, notifier: Option<Arc<dyn Notifier>>) -> Self {
        let tick = settings.status_log.tick;
        let (handle, receiver) = StatusLog::channel();
        let writer = StatusWriter::new(settings, receiver, notifier);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(writer.run(tick, Arc::clone(&stop_flag)));
        tracing::info!(tick_ms = tick.as_millis() as u64, "Status log writer started");

        Self {
            handle,
            stop_flag,
            worker,
            tick,
        }
    }

    /// Returns a producer handle.
    pub fn handle(&self) -> StatusLog {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Signals the writer to exit and waits for it.
    ///
    /// The writer runs one last cycle before exiting; events beyond that
    /// cycle's cap remain unwritten.
    pub async fn stop(self) {
        self.stop_flag.store(true, Ordering::SeqCst);

        let mut worker = self.worker;
        match tokio::time::timeout(self.tick + STOP_GRACE, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Status log writer panicked"),
            Err(_) => {
                tracing::warn!("Status log writer did not stop in time, aborting");
                worker.abort();
            }
        }
    }
}
