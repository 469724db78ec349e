//! Enhanced LKG retriever
//!
//! Graph-first retrieval: resolve the query into seed nodes via full-text
//! graph search, expand one hop, and rank the passages attached to the
//! visited nodes. Evidence close to a seed outranks evidence two hops out.

use super::{sort_and_truncate, RetrievalError, ScoredPassage};
use crate::concepts::ConceptExtractor;
use crate::graph::{with_store_retry, GraphStore, PassageId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Weights for the candidate-passage score: normalized text-index score,
/// graph-distance boost `1/(1+hop)`, and seed-concept overlap.
#[derive(Debug, Clone, Copy)]
pub struct LkgWeights {
    pub text: f32,
    pub hop: f32,
    pub overlap: f32,
}

impl Default for LkgWeights {
    fn default() -> Self {
        Self {
            text: 0.5,
            hop: 0.3,
            overlap: 0.2,
        }
    }
}

struct Candidate {
    passage: crate::graph::Passage,
    text_score: f32,
    hop: usize,
}

/// Graph-first passage retriever.
pub struct LkgRetriever {
    store: Arc<dyn GraphStore>,
    extractor: Arc<ConceptExtractor>,
    weights: LkgWeights,
    /// How many extracted concepts join the raw query as seeds
    seed_concepts: usize,
    /// Full-text k per seed
    per_seed_k: usize,
    store_retry_attempts: u32,
}

impl LkgRetriever {
    pub fn new(store: Arc<dyn GraphStore>, extractor: Arc<ConceptExtractor>) -> Self {
        Self {
            store,
            extractor,
            weights: LkgWeights::default(),
            seed_concepts: 4,
            per_seed_k: 8,
            store_retry_attempts: 5,
        }
    }

    pub fn with_weights(mut self, weights: LkgWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Ranked passages grounded in graph-proximal evidence.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>, RetrievalError> {
        // Seed terms: top extracted concepts plus the raw query. Extraction
        // failure degrades to the raw query alone rather than failing the
        // whole retriever.
        let concept_texts: Vec<String> = match self.extractor.extract(query).await {
            Ok(concepts) => concepts
                .into_iter()
                .take(self.seed_concepts)
                .map(|c| c.text)
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "concept extraction failed, using raw query only");
                Vec::new()
            }
        };

        let mut seeds: Vec<String> = concept_texts.clone();
        let trimmed = query.trim();
        if !trimmed.is_empty() {
            seeds.push(trimmed.to_string());
        }
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: HashMap<PassageId, Candidate> = HashMap::new();
        let mut expanded_nodes: HashSet<String> = HashSet::new();

        for seed in &seeds {
            // Direct passage hits — hop 0
            let passage_hits = with_store_retry(self.store_retry_attempts, || {
                self.store.fulltext_passage_search(seed, self.per_seed_k)
            })
            .await?;
            for hit in passage_hits {
                merge_candidate(&mut candidates, hit.passage, hit.score, 0);
            }

            // Seed nodes, their passages (hop 1), and one-hop expansion (hop 2)
            let node_hits = with_store_retry(self.store_retry_attempts, || {
                self.store.fulltext_node_search(seed, self.per_seed_k)
            })
            .await?;
            for node_hit in node_hits {
                let node_id = node_hit.node.id.clone();
                if !expanded_nodes.insert(node_id.as_str().to_string()) {
                    continue;
                }
                let passages = with_store_retry(self.store_retry_attempts, || {
                    self.store.passages_for_node(&node_id)
                })
                .await?;
                for passage in passages {
                    merge_candidate(&mut candidates, passage, node_hit.score, 1);
                }

                let neighbors = with_store_retry(self.store_retry_attempts, || {
                    self.store.neighbors(&node_id, 1, None)
                })
                .await?;
                for neighbor in neighbors {
                    if !expanded_nodes.insert(neighbor.id.as_str().to_string()) {
                        continue;
                    }
                    let passages = with_store_retry(self.store_retry_attempts, || {
                        self.store.passages_for_node(&neighbor.id)
                    })
                    .await?;
                    for passage in passages {
                        merge_candidate(&mut candidates, passage, node_hit.score, 2);
                    }
                }
            }
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let max_text = candidates
            .values()
            .map(|c| c.text_score)
            .fold(0.0f32, f32::max);

        let scored: Vec<ScoredPassage> = candidates
            .into_values()
            .map(|c| {
                let text_norm = if max_text > 0.0 {
                    c.text_score / max_text
                } else {
                    0.0
                };
                let hop_boost = 1.0 / (1.0 + c.hop as f32);
                let overlap = concept_overlap(&concept_texts, &c.passage.text);
                let score = self.weights.text * text_norm
                    + self.weights.hop * hop_boost
                    + self.weights.overlap * overlap;
                ScoredPassage {
                    passage: c.passage,
                    score,
                }
            })
            .collect();

        Ok(sort_and_truncate(scored, k))
    }
}

fn merge_candidate(
    candidates: &mut HashMap<PassageId, Candidate>,
    passage: crate::graph::Passage,
    text_score: f32,
    hop: usize,
) {
    candidates
        .entry(passage.id.clone())
        .and_modify(|c| {
            c.text_score = c.text_score.max(text_score);
            c.hop = c.hop.min(hop);
        })
        .or_insert(Candidate {
            passage,
            text_score,
            hop,
        });
}

/// Fraction of seed concepts whose text appears in the passage.
fn concept_overlap(concepts: &[String], passage_text: &str) -> f32 {
    if concepts.is_empty() {
        return 0.0;
    }
    let haystack = passage_text.to_lowercase();
    let matched = concepts.iter().filter(|c| haystack.contains(c.as_str())).count();
    matched as f32 / concepts.len() as f32
}
