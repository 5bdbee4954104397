//! Operational error reports.
//!
//! A node never fails a `send` or a registration because of a cluster-level
//! condition. It hands a `(kind, message)` report to an [`ErrorSink`] and
//! keeps running. Reporting is fire-and-forget: a sink must not panic back
//! into the node.

use std::sync::Mutex;

/// Conditions a node reports instead of returning an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A peer (or the node itself) announced a node id that is already taken.
    DuplicateNodeId,
    /// A mail could not reach its destination node and was dropped.
    UnroutableMail,
    /// Bad address, or configuration attempted after the node started.
    InvalidConfiguration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::DuplicateNodeId => "duplicate node id",
            ErrorKind::UnroutableMail => "unroutable mail",
            ErrorKind::InvalidConfiguration => "invalid configuration",
        };
        f.write_str(name)
    }
}

/// Receiver of operational reports.
pub trait ErrorSink: Send + Sync {
    /// Record one report.
    fn report(&self, kind: ErrorKind, message: &str);
}

/// Default sink: every report becomes a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, kind: ErrorKind, message: &str) {
        match kind {
            ErrorKind::InvalidConfiguration => tracing::error!("{}: {}", kind, message),
            ErrorKind::DuplicateNodeId | ErrorKind::UnroutableMail => {
                tracing::warn!("{}: {}", kind, message)
            }
        }
    }
}

/// A single recorded report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

/// Sink that keeps every report in memory.
///
/// Used by tests and by embedders that poll for reports.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<Report>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all reports so far, oldest first.
    pub fn reports(&self) -> Vec<Report> {
        match self.reports.lock() {
            Ok(reports) => reports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of reports of the given kind.
    pub fn count(&self, kind: ErrorKind) -> usize {
        self.reports().iter().filter(|r| r.kind == kind).count()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, kind: ErrorKind, message: &str) {
        tracing::debug!("recording report {}: {}", kind, message);
        let report = Report {
            kind,
            message: message.to_string(),
        };
        match self.reports.lock() {
            Ok(mut reports) => reports.push(report),
            Err(poisoned) => poisoned.into_inner().push(report),
        }
    }
}
