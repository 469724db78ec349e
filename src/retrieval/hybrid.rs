//! Concept-enhanced hybrid retriever
//!
//! Fuses four channels into one ranked passage list: direct graph search,
//! concept-seeded graph search, concept expansion through the vector index,
//! and dense HiPPO retrieval. A failed channel is logged and skipped; the
//! fusion only fails when every channel does.

use super::{sort_and_truncate, HippoRetriever, LkgRetriever, RetrievalError, ScoredPassage};
use crate::concepts::ConceptExtractor;
use crate::graph::{with_store_retry, Concept, ConceptId, GraphStore, PassageId, CONCEPT_ID_PREFIX};
use crate::vector::{IdFilter, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Fusion weights for the four channels. Missing channels don't penalize a
/// passage: the fused score is normalized over the weights of the channels
/// that actually scored it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridWeights {
    pub graph: f32,
    pub concept: f32,
    pub expansion: f32,
    pub hippo: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            graph: 0.3,
            concept: 0.25,
            expansion: 0.15,
            hippo: 0.3,
        }
    }
}

impl HybridWeights {
    pub fn from_array(w: [f32; 4]) -> Self {
        Self {
            graph: w[0],
            concept: w[1],
            expansion: w[2],
            hippo: w[3],
        }
    }
}

/// Observability counters for one or more hybrid retrievals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HybridSearchStats {
    /// Channels attempted (4 per retrieval)
    pub total_searches: u32,
    /// Channels that completed without error
    pub successful_searches: u32,
    pub graph_hits: u32,
    pub concept_hits: u32,
    pub expansion_hits: u32,
    pub hippo_hits: u32,
    pub unique_passages: u32,
}

impl HybridSearchStats {
    pub fn merge(&mut self, other: &HybridSearchStats) {
        self.total_searches += other.total_searches;
        self.successful_searches += other.successful_searches;
        self.graph_hits += other.graph_hits;
        self.concept_hits += other.concept_hits;
        self.expansion_hits += other.expansion_hits;
        self.hippo_hits += other.hippo_hits;
        self.unique_passages += other.unique_passages;
    }
}

/// Outcome of a hybrid retrieval: the fused ranking plus the per-channel
/// hit lists for observability.
#[derive(Debug, Clone)]
pub struct HybridResult {
    /// Ranked unique passages, length ≤ topN
    pub passages: Vec<ScoredPassage>,
    pub graph_hits: Vec<ScoredPassage>,
    pub concept_hits: Vec<ScoredPassage>,
    pub concept_expansion_hits: Vec<ScoredPassage>,
    pub hippo_hits: Vec<ScoredPassage>,
    pub stats: HybridSearchStats,
}

const CHANNELS: usize = 4;

/// The retriever behind both the chat path and the analyzer's search path.
pub struct HybridRetriever {
    lkg: Arc<LkgRetriever>,
    hippo: Arc<HippoRetriever>,
    extractor: Arc<ConceptExtractor>,
    store: Arc<dyn GraphStore>,
    index: Arc<dyn VectorIndex>,
    weights: HybridWeights,
    /// Concept vertices matched per extracted concept during expansion
    expansion_top_m: usize,
    store_retry_attempts: u32,
}

impl HybridRetriever {
    pub fn new(
        lkg: Arc<LkgRetriever>,
        hippo: Arc<HippoRetriever>,
        extractor: Arc<ConceptExtractor>,
        store: Arc<dyn GraphStore>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            lkg,
            hippo,
            extractor,
            store,
            index,
            weights: HybridWeights::default(),
            expansion_top_m: 5,
            store_retry_attempts: 5,
        }
    }

    pub fn with_weights(mut self, weights: HybridWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Fused retrieval. Deterministic given fixed store contents and
    /// embeddings: channel scores are max-normalized, fused by weighted
    /// mean over present channels, and ties break by passage id.
    pub async fn retrieve(&self, query: &str, top_n: usize) -> Result<HybridResult, RetrievalError> {
        let mut failures: Vec<String> = Vec::new();

        // Channel 1: direct graph search
        let graph_hits = match self.lkg.search(query, top_n).await {
            Ok(hits) => Some(hits),
            Err(err) => {
                tracing::warn!(error = %err, "graph channel failed");
                failures.push(format!("graph: {}", err));
                None
            }
        };

        // Concepts feed channels 2 and 3
        let concepts = match self.extractor.extract(query).await {
            Ok(concepts) => Some(concepts),
            Err(err) => {
                tracing::warn!(error = %err, "concept extraction failed");
                failures.push(format!("concepts: {}", err));
                None
            }
        };

        // Channel 2: concept-seeded graph search
        let concept_hits = match &concepts {
            Some(concepts) => self.concept_channel(concepts, top_n).await,
            None => None,
        };
        if concepts.is_some() && concept_hits.is_none() {
            failures.push("concept search: all seeds failed".to_string());
        }

        // Channel 3: concept expansion through the vector index
        let expansion_hits = match &concepts {
            Some(concepts) => self.expansion_channel(concepts).await,
            None => None,
        };
        if concepts.is_some() && expansion_hits.is_none() {
            failures.push("concept expansion: vector lookups failed".to_string());
        }

        // Channel 4: dense retrieval
        let hippo_hits = match self.hippo.search(query, top_n).await {
            Ok(hits) => Some(hits),
            Err(err) => {
                tracing::warn!(error = %err, "hippo channel failed");
                failures.push(format!("hippo: {}", err));
                None
            }
        };

        let successes = [
            graph_hits.is_some(),
            concept_hits.is_some(),
            expansion_hits.is_some(),
            hippo_hits.is_some(),
        ]
        .iter()
        .filter(|ok| **ok)
        .count();
        if successes == 0 {
            return Err(RetrievalError::Unavailable(failures.join("; ")));
        }

        let graph_hits = graph_hits.unwrap_or_default();
        let concept_hits = concept_hits.unwrap_or_default();
        let expansion_hits = expansion_hits.unwrap_or_default();
        let hippo_hits = hippo_hits.unwrap_or_default();

        let passages = self.fuse(
            [&graph_hits, &concept_hits, &expansion_hits, &hippo_hits],
            top_n,
        );

        let stats = HybridSearchStats {
            total_searches: CHANNELS as u32,
            successful_searches: successes as u32,
            graph_hits: graph_hits.len() as u32,
            concept_hits: concept_hits.len() as u32,
            expansion_hits: expansion_hits.len() as u32,
            hippo_hits: hippo_hits.len() as u32,
            unique_passages: passages.len() as u32,
        };

        tracing::debug!(
            query_len = query.len(),
            unique = stats.unique_passages,
            successful = stats.successful_searches,
            "hybrid retrieval complete"
        );

        Ok(HybridResult {
            passages,
            graph_hits,
            concept_hits,
            concept_expansion_hits: expansion_hits,
            hippo_hits,
            stats,
        })
    }

    /// Per-concept graph searches with `k = ceil(topN / |concepts|)`.
    /// Returns None only when every seed search hard-fails.
    async fn concept_channel(
        &self,
        concepts: &[Concept],
        top_n: usize,
    ) -> Option<Vec<ScoredPassage>> {
        if concepts.is_empty() {
            return Some(Vec::new());
        }
        let per_concept_k = top_n.div_ceil(concepts.len());
        let mut merged: HashMap<PassageId, ScoredPassage> = HashMap::new();
        let mut any_ok = false;
        for concept in concepts {
            match self.lkg.search(&concept.text, per_concept_k).await {
                Ok(hits) => {
                    any_ok = true;
                    for hit in hits {
                        merge_max(&mut merged, hit);
                    }
                }
                Err(err) => {
                    tracing::warn!(concept = %concept.text, error = %err, "concept seed search failed");
                }
            }
        }
        any_ok.then(|| merged.into_values().collect())
    }

    /// Resolve each extracted concept to stored Concept vertices by embedding
    /// similarity, then collect the passages attached to those vertices.
    async fn expansion_channel(&self, concepts: &[Concept]) -> Option<Vec<ScoredPassage>> {
        if concepts.is_empty() {
            return Some(Vec::new());
        }
        let filter = IdFilter::Prefix(CONCEPT_ID_PREFIX.to_string());
        let mut merged: HashMap<PassageId, ScoredPassage> = HashMap::new();
        let mut any_ok = false;
        for concept in concepts {
            let hits = match self
                .index
                .search(&concept.embedding, self.expansion_top_m, Some(&filter))
            {
                Ok(hits) => hits,
                Err(err) => {
                    tracing::warn!(concept = %concept.text, error = %err, "concept vector lookup failed");
                    continue;
                }
            };
            any_ok = true;
            for hit in hits {
                let concept_id = ConceptId::from_string(hit.id.clone());
                let passages = match with_store_retry(self.store_retry_attempts, || {
                    self.store.passages_for_concept(&concept_id)
                })
                .await
                {
                    Ok(passages) => passages,
                    Err(err) => {
                        tracing::warn!(concept_id = %hit.id, error = %err, "concept passage walk failed");
                        continue;
                    }
                };
                for passage in passages {
                    merge_max(
                        &mut merged,
                        ScoredPassage {
                            passage,
                            score: hit.score,
                        },
                    );
                }
            }
        }
        any_ok.then(|| merged.into_values().collect())
    }

    /// Weighted fusion over max-normalized channel scores, deduplicated by
    /// passage id.
    fn fuse(&self, channels: [&Vec<ScoredPassage>; CHANNELS], top_n: usize) -> Vec<ScoredPassage> {
        let weights = [
            self.weights.graph,
            self.weights.concept,
            self.weights.expansion,
            self.weights.hippo,
        ];

        struct Fused {
            passage: crate::graph::Passage,
            channel_scores: [Option<f32>; CHANNELS],
        }

        let mut by_id: HashMap<PassageId, Fused> = HashMap::new();
        for (channel, hits) in channels.iter().enumerate() {
            let max = hits.iter().map(|h| h.score).fold(0.0f32, f32::max);
            for hit in hits.iter() {
                let normalized = if max > 0.0 { hit.score / max } else { 0.0 };
                let entry = by_id
                    .entry(hit.passage.id.clone())
                    .or_insert_with(|| Fused {
                        passage: hit.passage.clone(),
                        channel_scores: [None; CHANNELS],
                    });
                let slot = &mut entry.channel_scores[channel];
                *slot = Some(slot.map_or(normalized, |s| s.max(normalized)));
            }
        }

        let fused: Vec<ScoredPassage> = by_id
            .into_values()
            .map(|f| {
                let mut weighted = 0.0f32;
                let mut weight_sum = 0.0f32;
                for (score, weight) in f.channel_scores.iter().zip(weights.iter()) {
                    if let Some(s) = score {
                        weighted += s * weight;
                        weight_sum += weight;
                    }
                }
                let score = if weight_sum > 0.0 {
                    weighted / weight_sum
                } else {
                    0.0
                };
                ScoredPassage {
                    passage: f.passage,
                    score,
                }
            })
            .collect();

        sort_and_truncate(fused, top_n)
    }
}

fn merge_max(merged: &mut HashMap<PassageId, ScoredPassage>, hit: ScoredPassage) {
    merged
        .entry(hit.passage.id.clone())
        .and_modify(|existing| existing.score = existing.score.max(hit.score))
        .or_insert(hit);
}
