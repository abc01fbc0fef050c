//! Error types for the hashing engine.
//!
//! [`HashError`] covers both the caller-facing failures of `submit` and
//! `fetch` and the internal failures a worker can hit. Caller-facing
//! variants carry the identifier involved so the transport layer can
//! render them without extra context.

use http::StatusCode;
use thiserror::Error;

use crate::RequestId;

/// Result type alias using [`HashError`].
pub type HashResult<T> = Result<T, HashError>;

/// Errors produced by the hashing engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// The submitted value was empty.
    #[error("value to hash must not be empty")]
    InvalidInput,

    /// The submission body exceeded the transport's size limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Largest accepted body, in bytes.
        limit: usize,
    },

    /// The identifier was never issued, or is not a valid identifier at all.
    #[error("{}", describe_unknown(.raw, .malformed))]
    UnknownId {
        /// The identifier as the caller supplied it.
        raw: String,
        /// Whether the identifier failed to parse.
        malformed: bool,
    },

    /// The identifier was issued but its result has not been committed yet.
    #[error("Results not available for idNum: {0}")]
    NotReady(RequestId),

    /// A result was committed twice for the same identifier.
    #[error("result for idNum {0} was already committed")]
    DuplicateKey(RequestId),

    /// The digest could not be computed.
    #[error("digest computation failed: {0}")]
    Compute(String),

    /// The worker for an accepted submission could not be started.
    #[error("failed to start worker for idNum {id}: {reason}")]
    Spawn {
        /// Identifier of the affected submission.
        id: RequestId,
        /// Why the worker could not be started.
        reason: String,
    },
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn describe_unknown(raw: &str, malformed: &bool) -> String {
    if *malformed {
        format!("Requested idNum not valid integer: {raw}")
    } else {
        format!("Unknown idNum: {raw}")
    }
}

impl HashError {
    /// Creates an error for an identifier that does not parse.
    pub fn malformed_id(raw: impl Into<String>) -> Self {
        Self::UnknownId {
            raw: raw.into(),
            malformed: true,
        }
    }

    /// Creates an error for a well-formed identifier that was never issued.
    pub fn unknown_id(id: RequestId) -> Self {
        Self::UnknownId {
            raw: id.to_string(),
            malformed: false,
        }
    }

    /// Creates a digest computation error.
    pub fn compute(reason: impl Into<String>) -> Self {
        Self::Compute(reason.into())
    }

    /// Returns `true` if retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }

    /// Returns `true` for errors that indicate a broken internal invariant.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput | Self::UnknownId { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotReady(_) => StatusCode::NOT_FOUND,
            Self::DuplicateKey(_) | Self::Compute(_) | Self::Spawn { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::UnknownId { .. } => "UNKNOWN_ID",
            Self::NotReady(_) => "NOT_READY",
            Self::DuplicateKey(_) => "DUPLICATE_KEY",
            Self::Compute(_) => "COMPUTE_FAILED",
            Self::Spawn { .. } => "SPAWN_FAILED",
        }
    }
}
