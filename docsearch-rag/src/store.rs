//! Build-or-load lifecycle of the persisted index.
//!
//! The [`IndexStore`] composes a [`DocumentLoader`], a [`Chunker`], and an
//! [`EmbeddingProvider`] around one index location on disk.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docsearch_rag::{IndexStore, RagConfig};
//!
//! let store = IndexStore::from_config(RagConfig::default(), Arc::new(my_embedder))?;
//! let index = store.get().await?;
//! println!("{} chunks", index.len());
//! ```

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use fs2::FileExt;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::document::Chunk;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::{FlatIndex, INDEX_VERSION, Index, IndexMeta};
use crate::loader::{DocumentLoader, loader_for_path};
use crate::persist;

/// Owns the index at [`RagConfig::index_location`] and builds it on demand.
///
/// Any number of stores, in any number of processes, may point at the same
/// location: builders serialize on an exclusive lock file next to it and a
/// builder that finds the index already written after acquiring the lock
/// loads it instead.
pub struct IndexStore {
    config: RagConfig,
    loader: Arc<dyn DocumentLoader>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    resolved: OnceCell<Arc<Index>>,
}

impl IndexStore {
    pub fn new(
        config: RagConfig,
        loader: Arc<dyn DocumentLoader>,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self { config, loader, chunker, embedder, resolved: OnceCell::new() }
    }

    /// Create a store whose loader is picked from the source's extension and
    /// whose chunker uses the configured size, overlap, and markers.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] if the chunking parameters are
    /// inconsistent.
    pub fn from_config(config: RagConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let loader = loader_for_path(&config.document_source);
        let chunker = Arc::new(RecursiveChunker::from_config(&config)?);
        Ok(Self::new(config, loader, chunker, embedder))
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn location(&self) -> &Path {
        &self.config.index_location
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Whether the primary index file is present.
    pub fn exists(&self) -> bool {
        persist::index_exists(self.location())
    }

    /// Resolve the index once for the lifetime of this store.
    ///
    /// Concurrent callers wait on the same resolution. A failed resolution is
    /// not cached; the next call tries again.
    pub async fn get(&self) -> Result<Arc<Index>> {
        self.resolved.get_or_try_init(|| async { self.build_or_load().await.map(Arc::new) }).await.cloned()
    }

    /// Load the persisted index, or build and persist it if absent.
    ///
    /// Always consults disk; use [`get`](Self::get) for the cached handle.
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexCorrupt`] if a persisted index cannot be loaded, or
    ///   the location is occupied by something else
    /// - [`RagError::SourceNotFound`] if a build is required and the source is
    ///   missing; nothing is written in that case
    /// - [`RagError::Io`] if the source cannot be checked (e.g. permissions)
    /// - [`RagError::DocumentEmpty`] if the source has no text
    /// - any loader or embedding error, unchanged
    pub async fn build_or_load(&self) -> Result<Index> {
        if self.exists() {
            return self.load().await;
        }

        let source = &self.config.document_source;
        match tokio::fs::try_exists(source).await {
            Ok(true) => {}
            Ok(false) => {
                error!(source = %source.display(), "source document not found");
                return Err(RagError::SourceNotFound { path: source.clone() });
            }
            Err(e) => {
                error!(source = %source.display(), error = %e, "cannot check source document");
                return Err(RagError::io(source, e));
            }
        }

        let _lock = BuildLock::acquire(self.location()).await?;
        if self.exists() {
            debug!(location = %self.location().display(), "index appeared while waiting for lock");
            return self.load().await;
        }
        let location = self.location().to_path_buf();
        run_blocking(move || {
            persist::remove_stale_temp_dirs(&location)?;
            persist::ensure_vacant(&location)
        })
        .await?;

        self.build().await
    }

    async fn load(&self) -> Result<Index> {
        let location = self.location().to_path_buf();
        let index = run_blocking(move || persist::read_index(&location)).await.inspect_err(|e| {
            error!(location = %self.location().display(), error = %e, "failed to load index");
        })?;

        let meta = index.meta();
        if meta.embedding_model != self.embedder.model_name() {
            warn!(
                indexed_with = %meta.embedding_model,
                querying_with = %self.embedder.model_name(),
                "embedding model differs from the one the index was built with"
            );
        }
        info!(location = %self.location().display(), chunks = index.len(), "loaded index");
        Ok(index)
    }

    async fn build(&self) -> Result<Index> {
        let source = &self.config.document_source;
        let document = self.loader.load(source).await?;
        let chunks = self.chunker.chunk(&document)?;
        if chunks.is_empty() {
            return Err(RagError::DocumentEmpty);
        }
        info!(source = %source.display(), pages = document.pages().len(), chunks = chunks.len(), "chunked document");

        let vectors = self.embed_chunks(&chunks).await?;
        let dimensions = vectors.first().map(Vec::len).unwrap_or_default();
        let meta = IndexMeta {
            version: INDEX_VERSION,
            embedding_model: self.embedder.model_name().to_string(),
            dimensions,
            chunk_size: self.config.chunk_size,
            chunk_overlap: self.config.chunk_overlap,
            chunk_count: chunks.len(),
            source: source.clone(),
            created_at: Utc::now(),
        };
        let index = Index::new(meta, chunks, FlatIndex::new(dimensions, vectors)?)?;

        let location = self.location().to_path_buf();
        let written = index.clone();
        run_blocking(move || persist::write_index(&location, &written)).await.inspect_err(|e| {
            error!(location = %self.location().display(), error = %e, "failed to persist index");
        })?;

        info!(
            location = %self.location().display(),
            chunks = index.len(),
            dimensions,
            model = %index.meta().embedding_model,
            "built index"
        );
        Ok(index)
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.config.embedding_batch_size.max(1);
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());

        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            debug!(batch = batch_no, size = texts.len(), "embedding chunk batch");

            let embedded = self.embedder.embed_batch(&texts).await.inspect_err(|e| {
                error!(batch = batch_no, error = %e, "chunk embedding failed");
            })?;
            if embedded.len() != texts.len() {
                return Err(RagError::Embedding {
                    provider: self.embedder.model_name().to_string(),
                    message: format!("got {} vectors for {} inputs", embedded.len(), texts.len()),
                });
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

/// Exclusive advisory lock on `<location>.lock`, released on drop.
struct BuildLock {
    file: File,
}

impl BuildLock {
    async fn acquire(location: &Path) -> Result<Self> {
        let path = persist::sibling(location, ".lock");
        run_blocking(move || {
            let parent = persist::parent_dir(&path);
            std::fs::create_dir_all(&parent).map_err(|e| RagError::io(&parent, e))?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| RagError::io(&path, e))?;
            file.lock_exclusive().map_err(|e| RagError::io(&path, e))?;
            debug!(lock = %path.display(), "acquired build lock");
            Ok(Self { file })
        })
        .await
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        RagError::io(PathBuf::new(), std::io::Error::other(format!("blocking task failed: {e}")))
    })?
}
