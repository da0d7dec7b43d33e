//! Error taxonomy surfaced by the RPC services
//!
//! Every subsystem keeps its own error enum. They are translated into a
//! [`ProxyError`] at the service boundary, and a `ProxyError` maps onto exactly
//! one gRPC status code.

use thiserror::Error;
use tonic::{Code, Status};

/// Coarse classification of a failure, independent of the subsystem that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Unimplemented,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> Code {
        match self {
            ErrorKind::InvalidArgument => Code::InvalidArgument,
            ErrorKind::NotFound => Code::NotFound,
            ErrorKind::FailedPrecondition => Code::FailedPrecondition,
            ErrorKind::Unimplemented => Code::Unimplemented,
            ErrorKind::Internal => Code::Internal,
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("{0}")]
    Unimplemented(String),

    #[error("{context}: {source}")]
    Internal {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Status returned by a downstream service, passed through untouched.
    #[error("{}", .0.message())]
    Remote(Status),
}

impl ProxyError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ProxyError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ProxyError::NotFound(msg.into())
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        ProxyError::FailedPrecondition(msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        ProxyError::Unimplemented(msg.into())
    }

    /// Wraps an unexpected failure, annotated with what was being attempted.
    pub fn internal<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        ProxyError::Internal {
            context: context.into(),
            source: source.into(),
        }
    }

    /// "received empty field in request" with the request rendered for context.
    pub fn empty_field(request: &impl std::fmt::Debug) -> Self {
        ProxyError::InvalidArgument(format!("received empty field in request: {request:?}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ProxyError::NotFound(_) => ErrorKind::NotFound,
            ProxyError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            ProxyError::Unimplemented(_) => ErrorKind::Unimplemented,
            ProxyError::Internal { .. } => ErrorKind::Internal,
            ProxyError::Remote(status) => match status.code() {
                Code::InvalidArgument => ErrorKind::InvalidArgument,
                Code::NotFound => ErrorKind::NotFound,
                Code::FailedPrecondition => ErrorKind::FailedPrecondition,
                Code::Unimplemented => ErrorKind::Unimplemented,
                _ => ErrorKind::Internal,
            },
        }
    }
}

impl From<Status> for ProxyError {
    fn from(status: Status) -> Self {
        ProxyError::Remote(status)
    }
}

impl From<ProxyError> for Status {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Remote(status) => status,
            other => Status::new(other.kind().code(), other.to_string()),
        }
    }
}
