//! Unified error type for docforge.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for an API layer to derive an HTTP status code via [`Error::http_status`].

use std::fmt;
use std::time::Duration;

/// Unified error type covering all failure modes in docforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The admission queue is at capacity; the job never ran.
    #[error("Queue is full")]
    AdmissionRejected {
        /// Capacity of the queue at the time of rejection.
        capacity: usize,
    },

    /// The converter exceeded its wall-clock deadline and its process group
    /// was terminated.
    #[error("Conversion timed out after {timeout:?}")]
    ConversionTimedOut {
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The converter exited with a nonzero status.
    #[error("{tool} failed (code {code}): {details}")]
    ConversionProcessFailed {
        /// Name of the converter program.
        tool: String,
        /// Exit code, or -1 when the process was killed by a signal.
        code: i32,
        /// Captured stderr/stdout text.
        details: String,
    },

    /// The converter exited cleanly but produced no matching output file.
    #[error("Output file not created: {details}")]
    OutputMissing {
        /// Captured stderr/stdout text.
        details: String,
    },

    /// Every attempt failed. Displays the last failure verbatim.
    #[error("{last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The failure observed on the final attempt.
        #[source]
        last: Box<Error>,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The job is not in a state that allows the requested transition.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be located or spawned.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::AdmissionRejected { .. } => 503,
            Error::ConversionTimedOut { .. } => 504,
            Error::ConversionProcessFailed { .. } => 500,
            Error::OutputMissing { .. } => 500,
            Error::RetriesExhausted { last, .. } => last.http_status(),
            Error::NotFound { .. } => 404,
            Error::Conflict(_) => 409,
            Error::Validation(_) => 400,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// The innermost failure, looking through [`Error::RetriesExhausted`].
    pub fn root(&self) -> &Error {
        match self {
            Error::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// Whether the (root) failure was a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::ConversionTimedOut { .. })
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::RetriesExhausted`].
    pub fn exhausted(attempts: u32, last: Error) -> Self {
        Error::RetriesExhausted {
            attempts,
            last: Box::new(last),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
