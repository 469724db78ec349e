//! Passage retrieval
//!
//! Three retrievers compose into the hybrid path: graph-first (`lkg`),
//! dense-with-rerank (`hippo`), and the concept-enhanced fusion (`hybrid`)
//! the analyzer and the chat endpoint call.

mod hippo;
mod hybrid;
mod lkg;

pub use hippo::{HippoRetriever, LexicalReranker, Reranker};
pub use hybrid::{HybridResult, HybridRetriever, HybridSearchStats, HybridWeights};
pub use lkg::{LkgRetriever, LkgWeights};

use crate::embedding::EmbeddingError;
use crate::graph::{GraphStoreError, Passage};
use thiserror::Error;

/// Errors from retrieval operations
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Every sub-retriever failed; nothing to ground an answer in.
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),

    #[error("graph store error: {0}")]
    Store(#[from] GraphStoreError),

    #[error("vector index error: {0}")]
    Vector(#[from] crate::vector::VectorError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("concept extraction error: {0}")]
    Extractor(#[from] crate::concepts::ExtractorError),
}

/// A passage with a retrieval score (channel-local or fused).
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Sort descending by score, ties by passage id ascending, and truncate.
pub(crate) fn sort_and_truncate(mut hits: Vec<ScoredPassage>, k: usize) -> Vec<ScoredPassage> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.passage.id.cmp(&b.passage.id))
    });
    hits.truncate(k);
    hits
}
