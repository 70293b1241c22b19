//! Error types shared by the backend client and the data management ops.

use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the line backend.
///
/// Everything except [`BackendError::Reported`] is a transport failure:
/// recovered locally, never fatal, never stops a poll schedule.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// TCP connect / DNS / TLS failure.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request did not complete within its bound.
    #[error("request timed out")]
    Timeout,

    /// Non-success HTTP status without a usable error body.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body could not be decoded.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The backend answered with an explicit error field.
    #[error("{0}")]
    Reported(String),
}

impl BackendError {
    /// Whether this is a transport failure (as opposed to a reported error).
    pub fn is_transport(&self) -> bool {
        !matches!(self, BackendError::Reported(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_connect() {
            BackendError::Connection(err.to_string())
        } else if err.is_decode() {
            BackendError::Parse(err.to_string())
        } else {
            BackendError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Parse(err.to_string())
    }
}

/// Failures of the export / clear operations.
#[derive(Debug, Error)]
pub enum OpsError {
    /// Export requested while the known dataset is empty.
    #[error("nothing to export: no anomaly data points are loaded")]
    NothingToExport,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The export payload was not a well-formed CSV document.
    #[error("malformed export payload: {0}")]
    Malformed(String),
}
