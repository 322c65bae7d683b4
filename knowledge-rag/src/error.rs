//! Error types for the `knowledge-rag` crate.

use thiserror::Error;

/// Errors that can occur while ingesting or retrieving knowledge.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Invalid configuration: bad chunk parameters, dimension mismatch, missing component.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The credential presented to an external provider was rejected.
    #[error("Authentication error ({provider}): {message}")]
    AuthenticationError {
        /// The provider that rejected the credential.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An external model provider failed or could not be reached.
    #[error("External service error ({provider}): {message}")]
    ExternalServiceError {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
        /// Whether retrying the same call may succeed.
        retryable: bool,
    },

    /// The vector store rejected or failed a read or write.
    #[error("Storage error ({backend}): {message}")]
    StorageError {
        /// The storage backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding cache failed. Only ever logged by the cache layer.
    #[error("Cache error ({backend}): {message}")]
    CacheError {
        /// The cache backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A request failed validation at the boundary.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The operation was cancelled before it mutated any state.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl KnowledgeError {
    /// Shorthand for a retryable [`KnowledgeError::ExternalServiceError`].
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalServiceError {
            provider: provider.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Shorthand for a non-retryable [`KnowledgeError::ExternalServiceError`].
    pub fn external(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalServiceError {
            provider: provider.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Shorthand for a [`KnowledgeError::StorageError`].
    pub fn storage(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StorageError { backend: backend.into(), message: message.into() }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalServiceError { retryable: true, .. })
    }

    /// The HTTP-equivalent status code for surfacing this error to a client.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::AuthenticationError { .. } => 401,
            Self::Cancelled(_) => 499,
            Self::ExternalServiceError { retryable: true, .. } => 503,
            Self::ExternalServiceError { retryable: false, .. } => 502,
            Self::ConfigError(_) | Self::StorageError { .. } | Self::CacheError { .. } => 500,
        }
    }
}

/// A convenience result type for knowledge operations.
pub type Result<T> = std::result::Result<T, KnowledgeError>;
