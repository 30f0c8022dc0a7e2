//! The boundary to the external embedding model.

use async_trait::async_trait;

use crate::error::Result;

/// Turns text into fixed-length vectors.
///
/// An index must be queried with the provider that built it. Vectors from a
/// different model are not comparable, and nothing here can tell; the store
/// only warns when the recorded [`model_name`](Self::model_name) differs.
///
/// Errors (network, timeout, rate limit) are returned as-is. Callers own any
/// retry policy.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, one vector per input in input order.
    ///
    /// Defaults to one [`embed`](Self::embed) call per text.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Identifier stored in [`IndexMeta`](crate::index::IndexMeta).
    fn model_name(&self) -> &str;
}
