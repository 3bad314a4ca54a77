//! Error types for the core.

use std::fmt;
use std::io;

/// Errors surfaced by repository, indexing, search, and durability operations.
#[derive(Debug)]
pub enum CoreError {
    /// An identifier does not resolve to a library, document, or chunk.
    NotFound(String),
    /// A constraint would be violated by the requested operation.
    Conflict(String),
    /// The request itself is invalid (bad dimension, missing fields, unbuilt index).
    BadRequest(String),
    /// WAL append or snapshot I/O failed.
    Io(io::Error),
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        CoreError::Conflict(detail.into())
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        CoreError::BadRequest(detail.into())
    }

    /// The exact wording required when a library's fixed embedding dimension
    /// disagrees with an incoming vector.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        CoreError::BadRequest(format!(
            "Embedding dimension mismatch: expected {}, got {}",
            expected, got
        ))
    }

    /// Stable tag used in serialized error responses (`{"error": tag, ...}`).
    pub fn tag(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "NotFound",
            CoreError::Conflict(_) => "Conflict",
            CoreError::BadRequest(_) => "BadRequest",
            CoreError::Io(_) => "Io",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NotFound(what) => write!(f, "not found: {}", what),
            CoreError::Conflict(detail) => write!(f, "conflict: {}", detail),
            CoreError::BadRequest(detail) => write!(f, "bad request: {}", detail),
            CoreError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        CoreError::Io(err)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Io(io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_message_is_exact() {
        let err = CoreError::dimension_mismatch(5, 7);
        assert_eq!(
            err.to_string(),
            "bad request: Embedding dimension mismatch: expected 5, got 7"
        );
    }

    #[test]
    fn tags_are_stable() {
        assert_eq!(CoreError::not_found("x").tag(), "NotFound");
        assert_eq!(CoreError::conflict("x").tag(), "Conflict");
        assert_eq!(CoreError::bad_request("x").tag(), "BadRequest");
    }
}
