//! Configuration for the retrieval core.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chunking::DEFAULT_BOUNDARY_MARKERS;
use crate::error::{RagError, Result};

/// Environment variable overriding [`RagConfig::index_location`].
pub const ENV_INDEX_DIR: &str = "DOCSEARCH_INDEX_DIR";
/// Environment variable overriding [`RagConfig::document_source`].
pub const ENV_SOURCE: &str = "DOCSEARCH_SOURCE";
/// Environment variable overriding [`RagConfig::top_k`].
pub const ENV_TOP_K: &str = "DOCSEARCH_TOP_K";
/// Environment variable overriding [`RagConfig::embedding_model`].
pub const ENV_EMBEDDING_MODEL: &str = "DOCSEARCH_EMBEDDING_MODEL";

/// Configuration parameters for chunking, indexing, and retrieval.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Maximum number of characters repeated between consecutive chunks.
    pub chunk_overlap: usize,
    /// Split points, most specific (section headings) first.
    pub boundary_markers: Vec<String>,
    /// Number of top results returned by the search tool.
    pub top_k: usize,
    /// Minimum relevance score for results (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Directory holding the persisted index.
    pub index_location: PathBuf,
    /// Path of the source document, read only when the index must be built.
    pub document_source: PathBuf,
    /// Embedding model name. Build and query must use the same model.
    pub embedding_model: String,
    /// Number of chunk texts sent per embedding request.
    pub embedding_batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 200,
            boundary_markers: DEFAULT_BOUNDARY_MARKERS.iter().map(|m| (*m).to_string()).collect(),
            top_k: 5,
            similarity_threshold: 0.0,
            index_location: PathBuf::from("faiss_index"),
            document_source: PathBuf::from("src/data/retrieval-augmented-generation-options.pdf"),
            embedding_model: "text-embedding-ada-002".to_string(),
            embedding_batch_size: 64,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Read and validate a TOML configuration file.
    ///
    /// Relative paths in the file are kept as written, i.e. relative to the
    /// process working directory.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] if the file cannot be read and
    /// [`RagError::Config`] if it does not parse or fails validation.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML configuration string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RagError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DOCSEARCH_*` environment overrides, then re-validate.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(dir) = lookup(ENV_INDEX_DIR) {
            self.index_location = PathBuf::from(dir);
        }
        if let Some(source) = lookup(ENV_SOURCE) {
            self.document_source = PathBuf::from(source);
        }
        if let Some(top_k) = lookup(ENV_TOP_K) {
            self.top_k = top_k
                .trim()
                .parse()
                .map_err(|e| RagError::Config(format!("{ENV_TOP_K}={top_k:?} is not a count: {e}")))?;
        }
        if let Some(model) = lookup(ENV_EMBEDDING_MODEL) {
            self.embedding_model = model;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `embedding_batch_size == 0`
    /// - any boundary marker is empty
    pub fn validate(&self) -> Result<()> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if self.embedding_batch_size == 0 {
            return Err(RagError::Config("embedding_batch_size must be greater than zero".to_string()));
        }
        if self.boundary_markers.iter().any(String::is_empty) {
            return Err(RagError::Config("boundary_markers must not contain empty strings".to_string()));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Replace the ordered list of boundary markers.
    pub fn boundary_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.boundary_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the number of top results returned by the search tool.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum relevance threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the directory holding the persisted index.
    pub fn index_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.config.index_location = location.into();
        self
    }

    /// Set the source document path.
    pub fn document_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.config.document_source = source.into();
        self
    }

    /// Set the embedding model name recorded in the index metadata.
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    /// Set the number of texts sent per embedding request.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
