//! Error types for the catalog engine.
//!
//! Each concern owns its own enum. Nothing in this crate terminates the
//! process; callers receive these values (or structured reports carrying
//! their messages) and decide what to do.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::NaturalKey;

/// Errors raised while building the catalog graph. Always fatal to the run.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file or directory could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON/TOML or does not match its schema.
    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// The `schema` field names no known document type.
    #[error("Unknown schema '{schema}' in {}", path.display())]
    UnknownSchema { path: PathBuf, schema: String },

    /// Two documents declare the same natural key within one scope.
    #[error("Duplicate {key} in {} (already declared in {})", path.display(), first.display())]
    DuplicateKey {
        path: PathBuf,
        key: NaturalKey,
        first: PathBuf,
    },

    /// A parent reference does not resolve inside the loaded graph.
    #[error("Unresolved reference in {}: {reference}", path.display())]
    UnresolvedReference { path: PathBuf, reference: String },

    /// The catalog has no seller document.
    #[error("No seller document found under {}", root.display())]
    MissingSeller { root: PathBuf },

    /// The document is structurally valid but semantically wrong.
    #[error("Invalid document {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
}

impl LoadError {
    /// Create a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unresolved reference error.
    pub fn unresolved(path: impl Into<PathBuf>, reference: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            path: path.into(),
            reference: reference.into(),
        }
    }

    /// Create an invalid document error.
    pub fn invalid(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }

    /// The file the error points at.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            LoadError::Io { path, .. }
            | LoadError::Parse { path, .. }
            | LoadError::UnknownSchema { path, .. }
            | LoadError::DuplicateKey { path, .. }
            | LoadError::UnresolvedReference { path, .. }
            | LoadError::Invalid { path, .. } => path,
            LoadError::MissingSeller { root } => root,
        }
    }
}

/// Errors talking to the catalog backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection failure or timeout.
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// True when the request never reached the server.
        connect: bool,
    },

    /// The backend answered with a non-success status.
    #[error("Backend rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The addressed entity or task does not exist.
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// The response body could not be decoded.
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// The client could not be configured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BackendError {
    /// Create a network error.
    pub fn network(message: impl Into<String>, connect: bool) -> Self {
        Self::Network {
            message: message.into(),
            connect,
        }
    }

    /// Create a rejection error.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Check if this error is transient and may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Network { .. } => true,
            BackendError::Rejected { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Check if the request is known not to have reached the server.
    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(self, BackendError::Network { connect: true, .. })
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            BackendError::network(e.to_string(), true)
        } else if e.is_timeout() {
            BackendError::network("Request timed out", false)
        } else if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::network(e.to_string(), false)
        }
    }
}

/// Errors from the durable test cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors preparing or executing one code example.
///
/// These never abort a test run; they become an `error` outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExampleError {
    #[error("Environment variable '{0}' is not set")]
    MissingEnv(String),

    #[error("Unknown placeholder '{0}' in template")]
    UnknownPlaceholder(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// A remote test task ended without a usable result.
    #[error("Remote test failed: {0}")]
    TaskFailed(String),
}

impl ExampleError {
    /// Failures in transit, worth another attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ExampleError::Execution(_) | ExampleError::Timeout(_))
    }
}

/// Umbrella error for pipeline-level operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Invalid scope pattern '{pattern}': {message}")]
    Scope { pattern: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for pipeline-level operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_names_file_and_reference() {
        let err = LoadError::unresolved("data/acme/listing.json", "offering 'gpt-5'");
        let message = err.to_string();
        assert!(message.contains("data/acme/listing.json"));
        assert!(message.contains("gpt-5"));
        assert_eq!(err.path(), std::path::Path::new("data/acme/listing.json"));
    }

    #[test]
    fn test_backend_error_is_retryable() {
        assert!(BackendError::network("reset", false).is_retryable());
        assert!(BackendError::rejected(503, "busy").is_retryable());
        assert!(BackendError::rejected(429, "slow down").is_retryable());
        assert!(!BackendError::rejected(422, "bad payload").is_retryable());
        assert!(!BackendError::not_found("offering", "x").is_retryable());
        assert!(!BackendError::Decode("eof".to_string()).is_retryable());
    }

    #[test]
    fn test_backend_error_is_connect() {
        assert!(BackendError::network("refused", true).is_connect());
        assert!(!BackendError::network("timed out", false).is_connect());
    }

    #[test]
    fn test_example_error_is_transient() {
        assert!(ExampleError::Execution("connection reset".to_string()).is_transient());
        assert!(ExampleError::Timeout(500).is_transient());
        assert!(!ExampleError::TaskFailed("upstream 500".to_string()).is_transient());
        assert!(!ExampleError::MissingEnv("KEY".to_string()).is_transient());
        assert!(!ExampleError::InvalidRequest("method".to_string()).is_transient());
    }
}
