//! In-memory index: chunks, their vectors, and exhaustive cosine top-K search.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::Chunk;
use crate::error::{RagError, Result};

/// Current on-disk format version, stored in both `meta.json` and `index.bin`.
pub const INDEX_VERSION: u32 = 1;

/// Metadata describing how an index was built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexMeta {
    pub version: u32,
    pub embedding_model: String,
    pub dimensions: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunk_count: usize,
    /// Document the chunks were taken from.
    pub source: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// A nearest-neighbor structure over a fixed set of vectors.
///
/// Positions returned by [`search`](SimilarityIndex::search) are indices
/// into the vectors in insertion order.
pub trait SimilarityIndex: Send + Sync {
    /// Return up to `top_k` `(position, cosine similarity)` pairs ordered by
    /// descending similarity, ties broken by ascending position.
    fn search(&self, query: &[f32], top_k: usize) -> Vec<(usize, f32)>;

    /// Number of vectors held.
    fn len(&self) -> usize;

    /// True when no vectors are held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality of every vector.
    fn dimensions(&self) -> usize;
}

/// L2-normalize a vector in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Dot product. On normalized vectors this equals cosine similarity.
pub fn dot_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// True when no component is NaN or infinite.
pub fn is_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Exhaustive search over L2-normalized vectors stored contiguously.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimensions: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Build from raw embedding vectors, normalizing each one.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] if `dimensions` is zero, any
    /// vector has a different length, or any component is NaN or infinite.
    pub fn new(dimensions: usize, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::InvalidParameter("vector dimensions must be non-zero".into()));
        }
        let mut data = Vec::with_capacity(dimensions * vectors.len());
        for (i, mut vector) in vectors.into_iter().enumerate() {
            if vector.len() != dimensions {
                return Err(RagError::InvalidParameter(format!(
                    "vector {i} has {} dimensions, expected {dimensions}",
                    vector.len()
                )));
            }
            if !is_finite(&vector) {
                return Err(RagError::InvalidParameter(format!("vector {i} has non-finite components")));
            }
            normalize(&mut vector);
            data.extend_from_slice(&vector);
        }
        Ok(Self { dimensions, data })
    }

    /// Wrap vectors that were already normalized, e.g. when read back from disk.
    pub(crate) fn from_normalized(dimensions: usize, data: Vec<f32>) -> Self {
        Self { dimensions, data }
    }

    /// The normalized vector at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    pub(crate) fn raw(&self) -> &[f32] {
        &self.data
    }
}

/// Min-heap entry for top-K selection: the worst kept candidate sits on top.
#[derive(Debug)]
struct HeapEntry {
    score: f32,
    position: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower score, then later position, compares greater.
        other.score.total_cmp(&self.score).then(self.position.cmp(&other.position))
    }
}

impl SimilarityIndex for FlatIndex {
    fn search(&self, query: &[f32], top_k: usize) -> Vec<(usize, f32)> {
        if top_k == 0 || query.len() != self.dimensions {
            return Vec::new();
        }
        let mut query = query.to_vec();
        normalize(&mut query);

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(top_k + 1);
        for (position, vector) in self.data.chunks_exact(self.dimensions).enumerate() {
            let score = dot_similarity(&query, vector);
            if !score.is_finite() {
                continue;
            }
            heap.push(HeapEntry { score, position });
            if heap.len() > top_k {
                heap.pop();
            }
        }

        heap.into_sorted_vec().into_iter().map(|e| (e.position, e.score)).collect()
    }

    fn len(&self) -> usize {
        self.data.len() / self.dimensions
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// A complete index: metadata, chunks, and one vector per chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    meta: IndexMeta,
    chunks: Vec<Chunk>,
    vectors: FlatIndex,
}

impl Index {
    /// Assemble an index, checking that chunks, vectors, and metadata agree.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] on any count or dimension mismatch.
    pub fn new(meta: IndexMeta, chunks: Vec<Chunk>, vectors: FlatIndex) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(RagError::InvalidParameter(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        if meta.chunk_count != chunks.len() || meta.dimensions != vectors.dimensions() {
            return Err(RagError::InvalidParameter(format!(
                "metadata says {} chunks x {} dims, found {} x {}",
                meta.chunk_count,
                meta.dimensions,
                chunks.len(),
                vectors.dimensions()
            )));
        }
        Ok(Self { meta, chunks, vectors })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn vectors(&self) -> &FlatIndex {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
