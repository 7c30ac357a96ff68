//! Crate-wide error type.
//!
//! Every fallible operation in the crate surfaces a [`RagError`]. The
//! variants map onto distinct failure policies: configuration problems are
//! fatal at startup, validation problems are reported per item without
//! aborting a batch, embedding failures carry a retryability flag consumed
//! by the provider's backoff loop, and index conflicts require explicit
//! operator action (drop and recreate) rather than any automatic repair.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Missing or invalid settings. Raised once at startup, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed input: empty text, missing filter metadata, wrong
    /// embedding length. Reported per item; does not abort the batch.
    #[error("validation error: {0}")]
    Validation(String),

    /// Embedding backend failure. `retryable` distinguishes transient
    /// transport/rate-limit errors from permanent ones.
    #[error("embedding provider error: {message}")]
    Embedding { message: String, retryable: bool },

    /// Chunk store failure (connection, SQL, extension loading).
    #[error("storage error: {0}")]
    Storage(String),

    /// `ensure_index` found the named index registered with a different
    /// dimension. The store never silently rebuilds or truncates vectors.
    #[error(
        "vector index '{name}' already exists with dimension {existing}, requested {requested}"
    )]
    IndexConflict {
        name: String,
        existing: usize,
        requested: usize,
    },
}

impl RagError {
    /// Whether a bounded-backoff retry is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::Embedding { retryable: true, .. })
    }

    /// Shorthand for a transient embedding failure.
    pub fn embedding_transient(message: impl Into<String>) -> Self {
        RagError::Embedding {
            message: message.into(),
            retryable: true,
        }
    }

    /// Shorthand for a permanent embedding failure.
    pub fn embedding_permanent(message: impl Into<String>) -> Self {
        RagError::Embedding {
            message: message.into(),
            retryable: false,
        }
    }
}
