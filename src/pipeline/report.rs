//! Error channel shared by every node in a graph.
//!
//! Production and job failures are recovered at the node or job that raised
//! them and end up here instead of unwinding into the host loop. The channel
//! keeps only the most recent report (last error wins) until it is dismissed.

use chrono::{DateTime, Utc};
use std::fmt::Display;

/// A reported failure with the context it happened in.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedError {
    pub message: String,
    pub context: String,
    pub reported_at: DateTime<Utc>,
}

impl Display for ReportedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

/// Last-error-wins sink.
#[derive(Debug, Default)]
pub struct ErrorChannel {
    latest: Option<ReportedError>,
    reported: u64,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error, replacing any previous one.
    pub fn report(&mut self, err: &dyn Display, context: impl Into<String>) -> ReportedError {
        let entry = ReportedError {
            message: err.to_string(),
            context: context.into(),
            reported_at: Utc::now(),
        };
        tracing::error!("{}", entry);
        self.reported += 1;
        self.latest = Some(entry.clone());
        entry
    }

    pub fn latest(&self) -> Option<&ReportedError> {
        self.latest.as_ref()
    }

    /// Clear the visible error. The running count is kept.
    pub fn dismiss(&mut self) -> Option<ReportedError> {
        self.latest.take()
    }

    /// Total number of reports since creation.
    pub fn reported_count(&self) -> u64 {
        self.reported
    }
}
