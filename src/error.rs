//! Error taxonomy shared by every stage of the pipeline.
//!
//! [`Error`] is `Clone` because one deduplicated execution fans its outcome out
//! to every attached caller.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::request::Request;
use crate::response::Response;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while orchestrating a request.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The server answered, but the business-success predicate rejected its code.
    #[error("business validation failed with code `{}`", .response.code())]
    ValidationFailed {
        request: Arc<Request>,
        response: Box<Response>,
    },

    /// The payload is not a structurally valid envelope.
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String, raw: Bytes },

    /// The envelope's data could not be decoded into the expected type.
    #[error("failed to decode response data: {source}")]
    DecodeFailed {
        #[source]
        source: Arc<serde_json::Error>,
        raw: Bytes,
    },

    #[error("response carried no data")]
    EmptyData,

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("request was cancelled")]
    Cancelled,

    #[error("request timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Default retry classification.
    ///
    /// Structural, decoding, validation and type errors are permanent; timeouts
    /// are transient; transport errors are transient unless the transport reports
    /// them as permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TimedOut { .. } => true,
            Self::Transport(err) => !err.is_permanent(),
            Self::ValidationFailed { .. }
            | Self::MalformedPayload { .. }
            | Self::DecodeFailed { .. }
            | Self::EmptyData
            | Self::TypeMismatch { .. }
            | Self::Cancelled => false,
        }
    }

    /// The server message carried by a validation failure.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::ValidationFailed { response, .. } => response.message(),
            _ => None,
        }
    }

    /// The raw payload behind a decoding failure, for diagnostics.
    pub fn raw_payload(&self) -> Option<&Bytes> {
        match self {
            Self::MalformedPayload { raw, .. } | Self::DecodeFailed { raw, .. } => Some(raw),
            Self::ValidationFailed { response, .. } => Some(response.raw()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("malformed url: {0}")]
    BadUrl(String),

    #[error("unsupported url: {0}")]
    UnsupportedUrl(String),

    #[error("cannot parse response: {0}")]
    CannotParseResponse(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Errors that no amount of retrying can fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::BadUrl(_) | Self::UnsupportedUrl(_) | Self::CannotParseResponse(_)
        )
    }
}
