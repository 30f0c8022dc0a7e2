//! Error types for the `docsearch-rag` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building, loading, or searching an index.
///
/// Every variant is terminal for the operation that produced it. Nothing in
/// this crate retries or degrades to an empty result on failure.
#[derive(Debug, Error)]
pub enum RagError {
    /// The source document is missing and an index build was required.
    #[error("Source document not found at {}", path.display())]
    SourceNotFound {
        /// The path that was expected to hold the document.
        path: PathBuf,
    },

    /// The loaded document has no extractable text.
    #[error("Document has no extractable text")]
    DocumentEmpty,

    /// A caller-supplied parameter violates its contract.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A persisted index is present but cannot be loaded.
    #[error("Index at {} is corrupt: {message}", path.display())]
    IndexCorrupt {
        /// The index location or the offending file inside it.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// The source document exists but its text could not be extracted.
    #[error("Failed to load document {}: {message}", path.display())]
    Load {
        /// The document path.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation or parsing error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl RagError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::IndexCorrupt { path: path.into(), message: message.into() }
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
