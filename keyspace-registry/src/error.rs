//! Registry error types.

use std::time::Duration;
use thiserror::Error;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Could not establish a handle to the key-value store.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single store request exceeded its deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired mid-request.
    #[error("Request cancelled")]
    Cancelled,

    /// The store rejected a request.
    #[error("Store error: {0}")]
    Store(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A stored or received payload does not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A key under `/services/` is not of the form `/services/<name>/<ip>:<port>`.
    #[error("Malformed service key: {0}")]
    MalformedKey(String),

    /// A checked write lost a compare-and-swap race.
    #[error("Conflicting update on {0}")]
    Conflict(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl RegistryError {
    /// Check if this is a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_)) || matches!(self, Self::Http(e) if e.is_timeout())
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_)) || matches!(self, Self::Http(e) if e.is_connect())
    }

    /// Check if a checked write was rejected because the catalog changed underneath it.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RegistryError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(RegistryError::Connection("refused".into()).is_connection());
        assert!(RegistryError::Conflict("/modules".into()).is_conflict());
        assert!(!RegistryError::Cancelled.is_timeout());
        assert!(!RegistryError::Store("boom".into()).is_connection());
    }

    #[test]
    fn test_error_display() {
        let err = RegistryError::MalformedKey("/services/api/nope".to_string());
        assert_eq!(err.to_string(), "Malformed service key: /services/api/nope");

        let err = RegistryError::Timeout(Duration::from_millis(1500));
        assert!(err.to_string().contains("1.5s"));
    }

    #[test]
    fn test_json_error_is_decode() {
        let err: RegistryError = serde_json::from_str::<Vec<u8>>("{").unwrap_err().into();
        assert!(matches!(err, RegistryError::Decode(_)));
    }
}
