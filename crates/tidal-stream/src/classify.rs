// ABOUTME: Classifies how a streaming session ended.
// ABOUTME: Maps every termination to Completed or exactly one ErrorKind.

use std::fmt;

use tonic::Code;

use crate::error::SessionError;

/// How a session ended, before classification.
#[derive(Debug, Clone)]
pub enum Termination {
    /// The server closed its side of the stream with no error.
    RemoteClosed,
    /// The read loop observed a local `cancel()`.
    LocalCancel,
    /// The call terminated with a gRPC status.
    Rpc(tonic::Status),
    /// The transport could not be reached when opening.
    Connect(String),
    /// The process-level task running the session was cancelled.
    TaskCancelled,
    Unexpected(String),
}

impl Termination {
    /// Detail worth carrying into a report, if any.
    pub fn detail(&self) -> Option<String> {
        match self {
            Termination::RemoteClosed | Termination::LocalCancel | Termination::TaskCancelled => {
                None
            }
            Termination::Rpc(status) => Some(format!("{:?}: {}", status.code(), status.message())),
            Termination::Connect(reason) | Termination::Unexpected(reason) => Some(reason.clone()),
        }
    }
}

impl From<SessionError> for Termination {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Connect(reason) => Termination::Connect(reason),
            SessionError::Rpc(status) => Termination::Rpc(status),
            other @ (SessionError::InvalidAddress(_) | SessionError::StreamClosed) => {
                Termination::Unexpected(other.to_string())
            }
        }
    }
}

/// Classified category of a session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `cancel()` was issued on this session.
    IntentionalCancel,
    /// A CANCELLED status arrived with no local `cancel()`; the origin is unknown.
    Cancelled,
    TransportUnavailable,
    DeadlineExceeded,
    OtherRpcError,
    LocalTaskCancelled,
    UnexpectedError,
}

impl ErrorKind {
    /// Failures attributed to the network rather than the peer or the client.
    pub fn is_transport(self) -> bool {
        matches!(
            self,
            ErrorKind::TransportUnavailable | ErrorKind::DeadlineExceeded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::IntentionalCancel => "intentional_cancel",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::TransportUnavailable => "transport_unavailable",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::OtherRpcError => "other_rpc_error",
            ErrorKind::LocalTaskCancelled => "local_task_cancelled",
            ErrorKind::UnexpectedError => "unexpected_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The server closed the stream normally.
    Completed,
    Failed(ErrorKind),
}

impl Outcome {
    pub fn is_completed(self) -> bool {
        matches!(self, Outcome::Completed)
    }

    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            Outcome::Completed => None,
            Outcome::Failed(kind) => Some(kind),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => f.write_str("completed"),
            Outcome::Failed(kind) => kind.fmt(f),
        }
    }
}

/// Classify a termination. First match wins:
///
/// 1. remote close with no error is `Completed`
/// 2. a recorded local `cancel()` is `IntentionalCancel`, whatever error surfaced
/// 3. a CANCELLED status without a local cancel stays `Cancelled`
/// 4. UNAVAILABLE (or an unreachable transport) is `TransportUnavailable`
/// 5. DEADLINE_EXCEEDED is `DeadlineExceeded`
/// 6. any other status is `OtherRpcError`
/// 7. cancellation of the surrounding task is `LocalTaskCancelled`
/// 8. everything else is `UnexpectedError`
pub fn classify(termination: &Termination, cancel_requested: bool) -> Outcome {
    let kind = match termination {
        Termination::RemoteClosed => return Outcome::Completed,
        _ if cancel_requested => ErrorKind::IntentionalCancel,
        Termination::LocalCancel => ErrorKind::IntentionalCancel,
        Termination::Rpc(status) => match status.code() {
            Code::Cancelled => ErrorKind::Cancelled,
            Code::Unavailable => ErrorKind::TransportUnavailable,
            Code::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            _ => ErrorKind::OtherRpcError,
        },
        Termination::Connect(_) => ErrorKind::TransportUnavailable,
        Termination::TaskCancelled => ErrorKind::LocalTaskCancelled,
        Termination::Unexpected(_) => ErrorKind::UnexpectedError,
    };
    Outcome::Failed(kind)
}
