//! Error types for document operations.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading, parsing or saving a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// A filesystem operation failed.
    #[error("Failed to {operation} '{path}': {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The XML text could not be tokenized.
    #[error("Failed to parse XML at byte {position}: {message}")]
    Parse { position: u64, message: String },

    /// The XML was well-formed at the token level but is not a single rooted tree.
    #[error("Malformed document: {0}")]
    Malformed(String),

    /// Serializing the tree back to XML failed.
    #[error("Failed to write XML: {0}")]
    Write(String),
}

impl DocumentError {
    pub(crate) fn io(operation: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// Result type for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;
