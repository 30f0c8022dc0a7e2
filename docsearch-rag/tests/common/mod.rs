//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use docsearch_rag::{EmbeddingProvider, RagConfig};

/// Deterministic bag-of-words embedder: each lowercase word is hashed into
/// one of `dimensions` buckets, so texts sharing words point the same way.
///
/// Counts batch calls (one per build batch) and single calls (one per query).
pub struct HashEmbedder {
    dimensions: usize,
    batch_calls: AtomicUsize,
    single_calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, batch_calls: AtomicUsize::new(0), single_calls: AtomicUsize::new(0) }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            v[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        // Keep word-free text off the zero vector.
        v[0] += 0.01;
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> docsearch_rag::Result<Vec<f32>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> docsearch_rag::Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }
}

pub const GUIDE_PAGES: &[&str] = &[
    "Introduction\nRetrieval Augmented Generation combines a language model with a search step. \
     The model answers from retrieved passages instead of memory.",
    "Generative AI options\nAmazon Bedrock offers managed foundation models. \
     Amazon Q Business answers questions over enterprise data.",
    "Retrievers\nAmazon Kendra is an enterprise search service. \
     Amazon OpenSearch Service supports vector search with k-NN.\n\n\
     FAISS is a library for efficient similarity search of dense vectors.",
];

/// Write the guide as a form-feed-paginated text file and return its path.
pub fn write_guide(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("guide.txt");
    std::fs::write(&path, GUIDE_PAGES.join("\x0c")).unwrap();
    path
}

/// Small chunks so the guide produces several of them.
pub fn config(dir: &Path, source: &Path) -> RagConfig {
    RagConfig::builder()
        .chunk_size(120)
        .chunk_overlap(20)
        .top_k(3)
        .index_location(dir.join("faiss_index"))
        .document_source(source)
        .build()
        .unwrap()
}
