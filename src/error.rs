//! Error handling for frameflow-rs
//!
//! Engine code returns [`PipelineError`]; this crate-level error wraps it
//! alongside configuration and file errors for the host and binary.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for frameflow-rs operations
#[derive(Error, Debug)]
pub enum FrameFlowError {
    /// Errors related to configuration or project loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by the graph engine
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FrameFlowError>,
    },
}

impl FrameFlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FrameFlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for frameflow-rs operations
pub type Result<T> = std::result::Result<T, FrameFlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FrameFlowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FrameFlowError::from(e).with_context(f()))
    }
}
