//! Error taxonomy for chainsaw
//!
//! Errors fall into a small number of kinds with different handling rules:
//! configuration errors are fatal at startup, input errors surface to the
//! caller unretried, provider errors are transient and feed the per-file
//! retry counters, and cancellation propagates verbatim.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, ChainsawError>;

/// Classification of provider failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Could not reach the provider at all
    Connection,
    /// The request exceeded its deadline
    Timeout,
    /// Non-200 HTTP status
    Status,
    /// The response body could not be interpreted
    Malformed,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Connection => "connection",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Status => "status",
            ProviderErrorKind::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainsawError {
    /// Missing or invalid configuration, schema-version mismatch,
    /// embedding-dimension mismatch. Fatal on startup, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid caller input: path outside allowed roots, unknown RETURN
    /// variable, undirected edge, unsupported aggregate.
    #[error("invalid input: {0}")]
    Input(String),

    /// Cypher parse failure with the offending token position.
    #[error("parse error at position {position}: {message}")]
    Query { message: String, position: usize },

    /// Transient provider failure. Counted against the per-file retry counter.
    #[error("provider error ({}): {message}", .kind.as_str())]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    /// Database-level failure.
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Filesystem failure, tagged with the operation and path for
    /// operational debugging.
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cooperative cancellation. Not an indexing failure.
    #[error("operation cancelled")]
    Cancelled,
}

impl ChainsawError {
    /// Attach operation + path context to an I/O error
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChainsawError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        ChainsawError::Provider {
            kind,
            message: message.into(),
        }
    }

    /// True for errors the pipeline may retry (provider and I/O failures).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainsawError::Provider { .. } | ChainsawError::Io { .. }
        )
    }
}
