//! Scored top-K retrieval against a resolved [`Index`].

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::{Index, SimilarityIndex, is_finite};

/// Map cosine similarity in `[-1, 1]` to a relevance score in `[0, 1]`.
pub fn relevance(cosine: f32) -> f32 {
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}

/// Embeds queries and ranks index chunks against them.
///
/// The embedder must be the one the index was built with; see
/// [`EmbeddingProvider`].
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    similarity_threshold: f32,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder, similarity_threshold: 0.0 }
    }

    /// Drop results whose relevance is below `threshold` after top-K selection.
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// Return at most `top_k` results ordered by descending score, ties by
    /// ascending `sequence_index`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] if `top_k` is zero or the query
    /// vector's dimension differs from the index, [`RagError::Embedding`] if
    /// the query vector is not finite, and any embedding error unchanged.
    pub async fn search(&self, index: &Index, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(RagError::InvalidParameter("top_k must be a positive integer".into()));
        }

        let query_vector = self.embedder.embed(query).await.inspect_err(|e| {
            error!(error = %e, "query embedding failed");
        })?;
        let dimensions = index.vectors().dimensions();
        if query_vector.len() != dimensions {
            return Err(RagError::InvalidParameter(format!(
                "query embedding has {} dimensions, index has {dimensions}",
                query_vector.len()
            )));
        }
        if !is_finite(&query_vector) {
            error!(model = %self.embedder.model_name(), "query embedding has non-finite components");
            return Err(RagError::Embedding {
                provider: self.embedder.model_name().to_string(),
                message: "query embedding contains NaN or infinite values".into(),
            });
        }

        let hits = index.vectors().search(&query_vector, top_k);
        debug!(candidates = hits.len(), top_k, "similarity search");

        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|(position, cosine)| {
                let chunk = index.chunks().get(position)?.clone();
                Some(SearchResult { chunk, score: relevance(cosine) })
            })
            .filter(|r| r.score >= self.similarity_threshold)
            .collect();
        // Mapping to [0, 1] can merge distinct cosines into equal scores.
        results.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then(a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
        });

        info!(query_len = query.len(), results = results.len(), "search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::document::Chunk;
    use crate::index::{FlatIndex, INDEX_VERSION, IndexMeta};

    /// Embeds a query as a fixed vector regardless of text.
    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn dimensions(&self) -> usize {
            self.0.len()
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn index(vectors: Vec<Vec<f32>>) -> Index {
        let chunks = (0..vectors.len())
            .map(|i| Chunk { text: format!("chunk {i}"), source_page: i, sequence_index: i, start_offset: i * 10 })
            .collect::<Vec<_>>();
        let meta = IndexMeta {
            version: INDEX_VERSION,
            embedding_model: "fixed".into(),
            dimensions: 2,
            chunk_size: 100,
            chunk_overlap: 0,
            chunk_count: chunks.len(),
            source: PathBuf::from("doc.pdf"),
            created_at: Utc::now(),
        };
        Index::new(meta, chunks, FlatIndex::new(2, vectors).unwrap()).unwrap()
    }

    fn retriever(query: Vec<f32>) -> Retriever {
        Retriever::new(Arc::new(FixedEmbedder(query)))
    }

    #[test]
    fn relevance_is_bounded() {
        assert_eq!(relevance(1.0), 1.0);
        assert_eq!(relevance(-1.0), 0.0);
        assert_eq!(relevance(0.0), 0.5);
        assert_eq!(relevance(1.000_001), 1.0);
    }

    #[tokio::test]
    async fn zero_top_k_is_rejected() {
        let idx = index(vec![vec![1.0, 0.0]]);
        let err = retriever(vec![1.0, 0.0]).search(&idx, "q", 0).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let idx = index(vec![vec![1.0, 0.0]]);
        let err = retriever(vec![1.0, 0.0, 0.0]).search(&idx, "q", 1).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn non_finite_query_is_an_embedding_error() {
        let idx = index(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let err = retriever(vec![f32::NAN, 0.0]).search(&idx, "q", 2).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding { ref provider, .. } if provider == "fixed"));
        let err = retriever(vec![f32::INFINITY, 1.0]).search(&idx, "q", 2).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding { .. }));
    }

    #[tokio::test]
    async fn results_are_ranked_and_bounded() {
        let idx = index(vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]]);
        let results = retriever(vec![1.0, 0.0]).search(&idx, "q", 2).await.unwrap();
        let order: Vec<usize> = results.iter().map(|r| r.chunk.sequence_index).collect();
        assert_eq!(order, vec![1, 2]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn threshold_filters_after_selection() {
        let idx = index(vec![vec![1.0, 0.0], vec![-1.0, 0.0]]);
        let results =
            retriever(vec![1.0, 0.0]).with_similarity_threshold(0.9).search(&idx, "q", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.sequence_index, 0);
    }
}
