//! Error taxonomy surfaced by a workflow run.
//!
//! Internal stages work with `anyhow::Result`; only configuration and
//! resource problems escape a run as [`Error`]. Location and export failures
//! are caught at their boundaries and returned as records instead.

use thiserror::Error;

/// Errors that terminate a run or describe an isolated failure.
#[derive(Debug, Error)]
pub enum Error {
    /// Structurally invalid configuration. Fatal for the whole run.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required folder, file or connection could not be created, opened or closed. Fatal.
    #[error("resource error: {0}")]
    Resource(String),

    /// Processing of one location failed. Isolated to that location.
    #[error("location {location} failed: {message}")]
    Location { location: String, message: String },

    /// Export of one category to one sink failed. Isolated to that category.
    #[error("export of {category} to {sink} failed: {message}")]
    Export { category: String, sink: String, message: String },

    /// Optional input data is missing; callers substitute a placeholder.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self { Self::Config(msg.into()) }

    pub(crate) fn resource(msg: impl Into<String>) -> Self { Self::Resource(msg.into()) }

    /// True for the kinds that abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Resource(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Render an anyhow error chain on one line, outermost context first.
pub(crate) fn chain_message(err: &anyhow::Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
