//! HiPPO retriever
//!
//! Dense retrieval over passage embeddings with a second-pass rerank. The
//! rerank contract is only that scores are monotone in relevance; the
//! default `LexicalReranker` blends dense similarity with query-term
//! overlap, and an LLM-prompt reranker can slot in behind the same trait.

use super::{sort_and_truncate, RetrievalError, ScoredPassage};
use crate::embedding::Embedder;
use crate::graph::{with_store_retry, GraphStore, Passage, PassageId, CONCEPT_ID_PREFIX};
use crate::vector::{IdFilter, VectorIndex};
use std::sync::Arc;

/// Scores a (query, passage) pair; higher is more relevant.
pub trait Reranker: Send + Sync {
    fn score(&self, query: &str, passage: &Passage, dense_score: f32) -> f32;
}

/// Default reranker: weighted blend of dense similarity and the fraction of
/// query terms present in the passage.
pub struct LexicalReranker {
    dense_weight: f32,
}

impl LexicalReranker {
    pub fn new(dense_weight: f32) -> Self {
        Self { dense_weight }
    }
}

impl Default for LexicalReranker {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl Reranker for LexicalReranker {
    fn score(&self, query: &str, passage: &Passage, dense_score: f32) -> f32 {
        let query_terms: Vec<String> = query
            .split_whitespace()
            .map(|t| {
                t.trim_matches(|c: char| c.is_ascii_punctuation())
                    .to_lowercase()
            })
            .filter(|t| !t.is_empty())
            .collect();
        let haystack = passage.text.to_lowercase();
        let overlap = if query_terms.is_empty() {
            0.0
        } else {
            query_terms
                .iter()
                .filter(|t| haystack.contains(t.as_str()))
                .count() as f32
                / query_terms.len() as f32
        };
        self.dense_weight * dense_score + (1.0 - self.dense_weight) * overlap
    }
}

/// Dense passage retriever with result-level reranking.
pub struct HippoRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn GraphStore>,
    reranker: Arc<dyn Reranker>,
    /// Fetch `k * oversample` dense hits so the rerank has room to reorder
    oversample: usize,
    store_retry_attempts: u32,
}

impl HippoRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            reranker: Arc::new(LexicalReranker::default()),
            oversample: 2,
            store_retry_attempts: 5,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Top-k passages by reranked dense similarity, sorted descending.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>, RetrievalError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.embedder.embed_batch(&[query.to_string()]).await?;
        let query_vector = match vectors.into_iter().next() {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };

        let filter = IdFilter::NotPrefix(CONCEPT_ID_PREFIX.to_string());
        let hits = self
            .index
            .search(&query_vector, k.max(1) * self.oversample, Some(&filter))?;

        let mut scored = Vec::with_capacity(hits.len());
        for hit in hits {
            let passage_id = PassageId::from_string(hit.id.clone());
            let passage = with_store_retry(self.store_retry_attempts, || {
                self.store.get_passage(&passage_id)
            })
            .await?;
            let Some(passage) = passage else {
                tracing::warn!(id = %hit.id, "vector hit without a stored passage, skipping");
                continue;
            };
            let score = self.reranker.score(query, &passage, hit.score);
            scored.push(ScoredPassage { passage, score });
        }

        Ok(sort_and_truncate(scored, k))
    }
}
