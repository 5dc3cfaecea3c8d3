//! Per round trip diagnostic buffer.
//!
//! Every line is also emitted through `tracing`; the buffered copy becomes the
//! detail of the failure report and is discarded on success.

use std::fmt::Write;

use crate::domain::RoundPair;

/// Severity of a buffered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl DiagnosticLevel {
    fn as_str(&self) -> &'static str {
        match self {
            DiagnosticLevel::Debug => "DEBUG",
            DiagnosticLevel::Info => "INFO",
            DiagnosticLevel::Warning => "WARNING",
            DiagnosticLevel::Error => "ERROR",
        }
    }
}

/// Accumulates `LEVEL:target: message` lines for one round trip.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    target: String,
    pair: String,
    capture_debug: bool,
    buffer: String,
}

impl DiagnosticLog {
    /// Creates a buffer named after the pair; DEBUG lines are kept only when
    /// `capture_debug` is set.
    pub fn new(pair: &RoundPair, capture_debug: bool) -> Self {
        Self {
            target: format!("mailround.round_trip.{}_{}", pair.out, pair.inbound),
            pair: pair.to_string(),
            capture_debug,
            buffer: String::new(),
        }
    }

    pub fn debug(&mut self, message: impl AsRef<str>) {
        tracing::debug!(pair = %self.pair, "{}", message.as_ref());
        self.push(DiagnosticLevel::Debug, message.as_ref());
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        tracing::info!(pair = %self.pair, "{}", message.as_ref());
        self.push(DiagnosticLevel::Info, message.as_ref());
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        tracing::warn!(pair = %self.pair, "{}", message.as_ref());
        self.push(DiagnosticLevel::Warning, message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        tracing::error!(pair = %self.pair, "{}", message.as_ref());
        self.push(DiagnosticLevel::Error, message.as_ref());
    }

    fn push(&mut self, level: DiagnosticLevel, message: &str) {
        if level == DiagnosticLevel::Debug && !self.capture_debug {
            return;
        }
        let _ = writeln!(self.buffer, "{}:{}: {}", level.as_str(), self.target, message);
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn into_contents(self) -> String {
        self.buffer
    }
}
