//! Error taxonomy of the data layer.
//!
//! Every failure surfaces as one of the kinds below. The layer recovers
//! nothing locally: an operation either fully succeeds or leaves its
//! transaction uncommitted. The single expected non-error "conflict" is the
//! idempotent salt/cmac upsert, which is modelled as a return value, not as
//! an error.

use thiserror::Error;

/// Failure kinds of the data layer.
#[derive(Debug, Error)]
pub enum ErxError {
    /// Malformed query string, date/enum literal or body argument.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An addressable entity does not exist at that id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A SQL result violated a structural expectation, an enum value was
    /// outside its domain, or a stored blob generation is unknown.
    #[error("internal error: {0}")]
    Internal(String),

    /// A core invariant was violated (double commit, operation after commit,
    /// missing mandatory field in a projection). Programmer error.
    #[error("logic error: {0}")]
    Logic(String),

    /// Connection lost, timeout, HSM unavailable. Retriable by the caller.
    #[error("transient i/o error: {0}")]
    TransientIo(String),

    /// AEAD verification or decompression failure. Must not occur in a
    /// healthy system; treated as internal by callers.
    #[error("crypto failure: {0}")]
    CryptoFailure(String),
}

impl ErxError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ErxError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ErxError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ErxError::Internal(message.into())
    }

    pub fn logic(message: impl Into<String>) -> Self {
        ErxError::Logic(message.into())
    }
}

impl From<serde_json::Error> for ErxError {
    fn from(err: serde_json::Error) -> Self {
        ErxError::Internal(format!("json serialization: {err}"))
    }
}

pub type ErxResult<T> = Result<T, ErxError>;
