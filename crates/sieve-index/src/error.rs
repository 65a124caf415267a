//! Error kinds returned by the embedding, vector-store and chat backends.
//!
//! Callers branch on the kind rather than on message text: transient
//! errors may be retried, rejections mark a file skipped, a missing
//! namespace triggers lazy creation and a dimension mismatch triggers a
//! rebuild.

use thiserror::Error;

/// Message fragments that identify connectivity problems in untyped errors.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "connect error",
    "error trying to connect",
    "timed out",
    "timeout",
    "broken pipe",
    "unavailable",
    "temporarily",
    "too many requests",
];

/// Message fragments that identify content rejected by a tokenizer.
const REJECTION_MARKERS: &[&str] = &[
    "token",
    "context length",
    "encoding",
    "input length",
    "too long",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Connectivity or timeout problem; safe to retry.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// The embedding model refused the content (tokenizer/encoding failure).
    #[error("embedding rejected: {0}")]
    EmbeddingRejected(String),

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("dimension mismatch: expected {expected}, found {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// Classify a free-form error message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if is_missing_collection(&lower) {
            BackendError::NamespaceNotFound(message)
        } else if is_transient_message(&lower) {
            BackendError::Transient(message)
        } else {
            BackendError::Other(message)
        }
    }

    /// Classify an HTTP client-error body from an embedding endpoint.
    pub fn from_rejection_body(status: u16, body: &str) -> Self {
        let lower = body.to_lowercase();
        if REJECTION_MARKERS.iter().any(|m| lower.contains(m)) {
            BackendError::EmbeddingRejected(format!("HTTP {}: {}", status, body))
        } else {
            BackendError::Other(format!("HTTP {}: {}", status, body))
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transient(_) => true,
            BackendError::Other(msg) | BackendError::InvalidResponse(msg) => {
                is_transient_message(&msg.to_lowercase())
            }
            _ => false,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, BackendError::EmbeddingRejected(_))
    }
}

/// A missing collection, as opposed to any other missing resource.
fn is_missing_collection(lower: &str) -> bool {
    lower.contains("collection")
        && (lower.contains("not found")
            || lower.contains("doesn't exist")
            || lower.contains("does not exist"))
}

fn is_transient_message(lower: &str) -> bool {
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            BackendError::Transient(err.to_string())
        } else if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else {
            BackendError::from_message(err.to_string())
        }
    }
}

impl From<qdrant_client::QdrantError> for BackendError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        BackendError::from_message(err.to_string())
    }
}
