//! Expansion error types

use std::error::Error as _;
use std::io;
use thiserror::Error;

/// Errors from a single expander lookup
#[derive(Debug, Clone, Error)]
pub enum ExpandError {
    #[error("Lookup timed out")]
    Timeout,

    #[error("Connection lost: {0}")]
    Disconnected(String),

    #[error("Unexpected status {status}")]
    Status { status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl ExpandError {
    /// Only timeouts and dropped connections are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, ExpandError::Timeout | ExpandError::Disconnected(_))
    }

    /// Classify a reqwest failure
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ExpandError::Timeout;
        }
        if err.is_connect() || err.is_body() || err.is_request() || has_disconnect_source(&err) {
            return ExpandError::Disconnected(err.to_string());
        }
        if err.is_decode() {
            return ExpandError::InvalidResponse(err.to_string());
        }
        if let Some(status) = err.status() {
            return ExpandError::Status {
                status: status.as_u16(),
            };
        }
        ExpandError::Request(err.to_string())
    }
}

fn has_disconnect_source(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && matches!(
                io_err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            )
        {
            return true;
        }
        source = cause.source();
    }
    false
}
