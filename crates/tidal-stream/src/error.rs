// ABOUTME: Error types for the tidal-stream crate.
// ABOUTME: Covers opening a streaming session and validating session/retry configuration.

use thiserror::Error;

/// Errors that can occur while opening a streaming session.
///
/// Once a session is running nothing is returned as an error: every way a
/// session can end is a [`Termination`](crate::classify::Termination).
#[derive(Error, Debug)]
pub enum SessionError {
    /// Invalid server address format.
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    /// The transport could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server rejected the streaming call before any message flowed.
    #[error("stream start failed: {0}")]
    Rpc(tonic::Status),

    /// The outbound channel was closed.
    #[error("stream closed")]
    StreamClosed,
}

impl From<tonic::Status> for SessionError {
    fn from(status: tonic::Status) -> Self {
        SessionError::Rpc(status)
    }
}

impl From<tonic::transport::Error> for SessionError {
    fn from(err: tonic::transport::Error) -> Self {
        SessionError::Connect(err.to_string())
    }
}

/// Invalid session or reconnection settings.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("drop probability must be within [0, 1], got {0}")]
    DropProbability(f64),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("auto-cancel delay must be a finite, non-negative number of seconds, got {0}")]
    AutoCancelDelay(f64),

    #[error("unknown wire '{0}', expected envelope or framed")]
    UnknownWire(String),
}
