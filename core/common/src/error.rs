//! Common error types for ProfileKit.

use thiserror::Error;

/// Top-level error type for ProfileKit operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No active session; the operation requires a signed-in user.
    #[error("Unauthenticated: no active session")]
    Unauthenticated,

    /// The backing service could not be reached or answered with a failure.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An insert or non-overwriting write collided with an existing key.
    #[error("Conflict on insert: {0}")]
    ConflictOnInsert(String),

    /// Credentials were rejected or a sign-in flow failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Operation not permitted.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error came from the remote service rather than the caller.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_)
                | Error::Authentication(_)
                | Error::PermissionDenied(_)
                | Error::ConflictOnInsert(_)
                | Error::NotFound(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_message() {
        assert_eq!(
            Error::Unauthenticated.to_string(),
            "Unauthenticated: no active session"
        );
    }

    #[test]
    fn test_remote_classification() {
        assert!(Error::StoreUnavailable("down".into()).is_remote());
        assert!(Error::ConflictOnInsert("dup".into()).is_remote());
        assert!(!Error::Unauthenticated.is_remote());
        assert!(!Error::InvalidInput("bad".into()).is_remote());
    }

    #[test]
    fn test_from_serde_json() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
