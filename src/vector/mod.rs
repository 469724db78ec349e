//! Vector index over passage and concept embeddings
//!
//! Passage and concept vectors share one index keyed by stable ids; concept
//! ids carry the `concept:` prefix, which is what `IdFilter` partitions on.

#[cfg(feature = "embeddings")]
mod sqlite_vec;

#[cfg(feature = "embeddings")]
pub use sqlite_vec::SqliteVecIndex;

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

/// Errors from vector index operations
#[derive(Debug, Error)]
pub enum VectorError {
    #[error("dimension mismatch: index is {expected}-dimensional, vector is {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector backend error: {0}")]
    Backend(String),
}

/// A search hit: stable id plus cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
}

/// Restricts a search to a subset of ids.
#[derive(Debug, Clone)]
pub enum IdFilter {
    /// Only ids with this prefix
    Prefix(String),
    /// Only ids without this prefix
    NotPrefix(String),
    /// Only ids in this set
    Ids(HashSet<String>),
}

impl IdFilter {
    pub fn matches(&self, id: &str) -> bool {
        match self {
            IdFilter::Prefix(p) => id.starts_with(p.as_str()),
            IdFilter::NotPrefix(p) => !id.starts_with(p.as_str()),
            IdFilter::Ids(set) => set.contains(id),
        }
    }
}

/// Trait for approximate nearest-neighbor backends
///
/// Guarantees: deterministic top-k given identical query and index state;
/// ties broken by id ascending. All vectors share the index dimension,
/// checked at upsert.
pub trait VectorIndex: Send + Sync {
    /// The dimensionality of vectors in this index.
    fn dimensions(&self) -> usize;

    /// Insert or replace a vector (ingestion only).
    fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<(), VectorError>;

    /// Top-k by cosine similarity, optionally filtered.
    fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&IdFilter>,
    ) -> Result<Vec<VectorHit>, VectorError>;

    /// Fetch a stored vector by id.
    fn get(&self, id: &str) -> Result<Option<Vec<f32>>, VectorError>;
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// In-memory brute-force cosine index.
///
/// BTreeMap keys give deterministic iteration, so equal similarities
/// tie-break by id ascending without extra work.
pub struct MemoryVectorIndex {
    dimensions: usize,
    vectors: RwLock<BTreeMap<String, Vec<f32>>>,
}

impl MemoryVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.read().unwrap().is_empty()
    }
}

impl VectorIndex for MemoryVectorIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<(), VectorError> {
        if vector.len() != self.dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        self.vectors.write().unwrap().insert(id.to_string(), vector);
        Ok(())
    }

    fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&IdFilter>,
    ) -> Result<Vec<VectorHit>, VectorError> {
        if vector.len() != self.dimensions {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        let store = self.vectors.read().unwrap();
        let mut hits: Vec<VectorHit> = store
            .iter()
            .filter(|(id, _)| filter.map_or(true, |f| f.matches(id)))
            .map(|(id, stored)| VectorHit {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    fn get(&self, id: &str) -> Result<Option<Vec<f32>>, VectorError> {
        Ok(self.vectors.read().unwrap().get(id).cloned())
    }
}
