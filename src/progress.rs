// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ordered progress log of a single run.
//!
//! Installs and builds report a linear stream of [`LogLine`]s to whoever is
//! watching, e.g., a terminal progress bar. Emission never blocks. Once the
//! receiving side is gone, lines are quietly dropped, and the run carries on.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// Single progress message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Sequence number, strictly increasing within a run.
    pub seq: u64,
    pub level: LogLevel,
    pub message: String,
}

impl Display for LogLine {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self.level {
            LogLevel::Info => write!(fmt, "{}", self.message),
            level => write!(fmt, "[{level}] {}", self.message),
        }
    }
}

/// Sending half of a progress log.
///
/// Clones share one sequence counter, so lines stay totally ordered no
/// matter which clone emitted them.
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    sender: Option<UnboundedSender<LogLine>>,
    seq: Arc<AtomicU64>,
}

impl ProgressLog {
    /// Construct connected progress log and its receiver.
    pub fn channel() -> (Self, UnboundedReceiver<LogLine>) {
        let (sender, receiver) = unbounded_channel();
        let log = Self {
            sender: Some(sender),
            seq: Arc::new(AtomicU64::new(0)),
        };

        (log, receiver)
    }

    /// Construct progress log that nobody listens to.
    ///
    /// Lines still reach the tracing subscriber.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message.into());
    }

    fn emit(&self, level: LogLevel, message: String) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        debug!(seq, %level, "{message}");

        if let Some(sender) = &self.sender {
            // INVARIANT: A dropped receiver must never fail the run.
            let _ = sender.send(LogLine {
                seq,
                level,
                message,
            });
        }
    }
}
