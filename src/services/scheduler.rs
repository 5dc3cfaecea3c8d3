//! Periodic round trip scheduling.
//!
//! The [`Scheduler`] keeps one slot per monitored pair. A slot holds the
//! join handle of the running round trip plus a completion signal; a new
//! round trip for a pair is only started once the previous one is done.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::round_trip::{RoundEndpoints, RoundTrip, RoundTripOptions, RoundTripReport};
use super::status_log::StatusLog;
use crate::config::Settings;
use crate::domain::{CorrelationId, RoundPair};
use crate::providers::email::EndpointRegistry;
use crate::providers::notify::Notifier;

/// Extra time a round trip gets to finish when the scheduler shuts down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

struct TaskSlot {
    correlation_id: CorrelationId,
    handle: JoinHandle<RoundTripReport>,
    completed: watch::Receiver<bool>,
}

/// Starts one round trip per pair and check interval.
pub struct Scheduler {
    settings: Arc<Settings>,
    registry: EndpointRegistry,
    notifier: Arc<dyn Notifier>,
    status_log: StatusLog,
    tasks: HashMap<String, TaskSlot>,
}

impl Scheduler {
    pub fn new(
        settings: Arc<Settings>,
        registry: EndpointRegistry,
        notifier: Arc<dyn Notifier>,
        status_log: StatusLog,
    ) -> Self {
        Self {
            settings,
            registry,
            notifier,
            status_log,
            tasks: HashMap::new(),
        }
    }

    /// Number of round trips that have not been reaped yet.
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Starts a round trip for every pair whose previous one has finished.
    ///
    /// Returns the number of round trips started.
    pub async fn tick(&mut self) -> usize {
        let mut started = 0;

        for pair in self.settings.rounds.clone() {
            let key = pair.to_string();

            if let Some(slot) = self.tasks.remove(&key) {
                if let Some(slot) = Self::settle(slot, self.settings.replace_grace).await {
                    tracing::warn!(
                        pair = %key,
                        group = %slot.correlation_id,
                        "Previous round trip still running, skipping this interval"
                    );
                    self.tasks.insert(key, slot);
                    continue;
                }
            }

            match self.spawn(&pair) {
                Some(slot) => {
                    self.tasks.insert(key, slot);
                    started += 1;
                }
                None => tracing::error!(pair = %key, "No endpoints configured for round"),
            }
        }

        started
    }

    fn spawn(&self, pair: &RoundPair) -> Option<TaskSlot> {
        let endpoints = RoundEndpoints::resolve(pair, &self.settings, &self.registry)?;
        let task = RoundTrip::new(
            pair.clone(),
            endpoints,
            RoundTripOptions::from_settings(&self.settings),
            self.status_log.clone(),
            Arc::clone(&self.notifier),
        );
        let correlation_id = task.correlation_id().clone();
        tracing::debug!(pair = %pair, group = %correlation_id, "Starting round trip");

        let (done, completed) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let report = task.run().await;
            let _ = done.send(true);
            report
        });

        Some(TaskSlot {
            correlation_id,
            handle,
            completed,
        })
    }

    /// Waits up to `grace` for a slot to complete. Hands the slot back if it
    /// is still running.
    async fn settle(mut slot: TaskSlot, grace: Duration) -> Option<TaskSlot> {
        let done = *slot.completed.borrow();
        let finished = done
            || match tokio::time::timeout(grace, slot.completed.wait_for(|done| *done)).await {
                Ok(_) => true,
                Err(_) => false,
            };

        if !finished {
            return Some(slot);
        }

        match slot.handle.await {
            Ok(report) => log_report(&report),
            Err(e) => tracing::error!(group = %slot.correlation_id, error = %e, "Round trip task failed"),
        }
        None
    }

    /// Runs until `shutdown` resolves, then waits for running round trips.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.settings.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let started = self.tick().await;
                    tracing::debug!(started, active = self.tasks.len(), "Scheduler tick");
                }
            }
        }

        tracing::info!(active = self.tasks.len(), "Scheduler stopping");
        self.drain().await;
    }

    /// Waits for every running round trip, aborting those that overrun.
    pub async fn drain(&mut self) {
        let grace = self.settings.max_receive_time + SHUTDOWN_GRACE;

        for (pair, slot) in self.tasks.drain() {
            if let Some(slot) = Self::settle(slot, grace).await {
                tracing::warn!(pair = %pair, group = %slot.correlation_id, "Aborting round trip");
                slot.handle.abort();
            }
        }
    }
}

fn log_report(report: &RoundTripReport) {
    if report.outcome.is_success() {
        tracing::info!(
            pair = %report.pair,
            group = %report.correlation_id,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Round trip succeeded"
        );
    } else {
        tracing::warn!(
            pair = %report.pair,
            group = %report.correlation_id,
            outcome = ?report.outcome,
            graylisting = report.graylisting_suspected,
            notified = report.delivered,
            "Round trip failed"
        );
    }
}
