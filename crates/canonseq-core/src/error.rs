//! Error types for canonseq.
//!
//! Library code returns [`CanonError`]. Resolution and selection outcomes that
//! are expected (a gene that does not exist, an empty transcript list) are not
//! errors; they travel as [`Lookup`] variants so call sites must handle them.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the canonseq library.
#[derive(Debug, Error)]
pub enum CanonError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Pipeline errors
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for canonseq operations.
pub type Result<T> = std::result::Result<T, CanonError>;

impl From<std::io::Error> for CanonError {
    fn from(err: std::io::Error) -> Self {
        CanonError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CanonError {
    fn from(err: serde_json::Error) -> Self {
        CanonError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for CanonError {
    fn from(err: rusqlite::Error) -> Self {
        CanonError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for CanonError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CanonError::Timeout(std::time::Duration::from_secs(0))
        } else {
            CanonError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl CanonError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CanonError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a not-found error for the given subject.
    pub fn not_found(what: impl Into<String>) -> Self {
        CanonError::NotFound { what: what.into() }
    }

    /// Transient failures of an external service: network, timeouts, 429 and 5xx.
    ///
    /// Only the transport retries these. Resolver and selector treat them as
    /// "no answer from that source".
    pub fn is_transient(&self) -> bool {
        match self {
            CanonError::Network { .. } | CanonError::Timeout(_) | CanonError::RateLimited { .. } => {
                true
            }
            CanonError::Http { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }
}

/// Tagged outcome of a lookup against the pipeline or an external source.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// The lookup produced a value.
    Found(T),
    /// The subject does not exist. Terminal, never retried.
    NotFound,
    /// The source could not answer (transient failure or disabled).
    Unavailable { reason: String },
}

impl<T> Lookup<T> {
    /// Returns the found value, if any.
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound | Lookup::Unavailable { .. } => None,
        }
    }

    /// Convert into a `Result`, turning both non-found variants into errors.
    pub fn into_result(self, what: impl Into<String>) -> Result<T> {
        match self {
            Lookup::Found(value) => Ok(value),
            Lookup::NotFound => Err(CanonError::not_found(what)),
            Lookup::Unavailable { reason } => Err(CanonError::Other(format!(
                "{} unavailable: {}",
                what.into(),
                reason
            ))),
        }
    }
}

impl<T> From<Result<Option<T>>> for Lookup<T> {
    fn from(result: Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => Lookup::Found(value),
            Ok(None) => Lookup::NotFound,
            Err(e) => Lookup::Unavailable {
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CanonError::CheckpointNotFound("batch_1".into());
        assert_eq!(err.to_string(), "Checkpoint not found: batch_1");
    }

    #[test]
    fn test_transient_classification() {
        assert!(CanonError::Timeout(std::time::Duration::from_secs(5)).is_transient());
        assert!(CanonError::Http {
            url: "https://rest.uniprot.org".into(),
            status: 503
        }
        .is_transient());
        assert!(!CanonError::Http {
            url: "https://rest.uniprot.org".into(),
            status: 400
        }
        .is_transient());
        assert!(!CanonError::not_found("TP53").is_transient());
    }

    #[test]
    fn test_lookup_from_result() {
        let found: Lookup<u32> = Ok(Some(3)).into();
        assert_eq!(found, Lookup::Found(3));

        let missing: Lookup<u32> = Ok(None).into();
        assert_eq!(missing, Lookup::NotFound);

        let failed: Lookup<u32> = Err(CanonError::Timeout(std::time::Duration::ZERO)).into();
        assert!(matches!(failed, Lookup::Unavailable { .. }));
    }

    #[test]
    fn test_lookup_into_result() {
        assert_eq!(Lookup::Found(1).into_result("x").unwrap(), 1);
        assert!(matches!(
            Lookup::<u32>::NotFound.into_result("BRCA9"),
            Err(CanonError::NotFound { .. })
        ));
    }
}
