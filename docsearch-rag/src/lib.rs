//! Retrieval core for answering questions against a single technical document.
//!
//! This crate provides:
//! - Page-aware loading of PDF and plain-text sources
//! - Header-aware recursive chunking with bounded overlap
//! - A persisted vector index with atomic writes and a cross-process build lock
//! - Scored top-K retrieval and an evidence-formatting search tool
//!
//! # Feature flags
//!
//! - `openai`: [`openai::OpenAIEmbeddingProvider`] over the OpenAI embeddings API

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod loader;
pub mod persist;
pub mod retriever;
pub mod store;
pub mod tool;

#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{Chunker, DEFAULT_BOUNDARY_MARKERS, RecursiveChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Chunk, Document, Page, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use index::{FlatIndex, Index, IndexMeta, SimilarityIndex};
pub use loader::{DocumentLoader, PdfLoader, TextLoader, loader_for_path};
pub use retriever::{Retriever, relevance};
pub use store::IndexStore;
pub use tool::{BLOCK_SEPARATOR, DocumentSearchTool, NO_EVIDENCE, format_results};
