//! Graph store trait definitions
//!
//! The analyzer only reads from the graph; the write path belongs to the
//! ingestion pipeline. Implementations must be thread-safe (Send + Sync) and
//! give each operation a read-consistent snapshot.

use super::types::{Concept, ConceptId, Node, NodeId, Passage, PassageId, Relation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during graph store operations
#[derive(Debug, Error)]
pub enum GraphStoreError {
    /// Transient connection loss — retried by the caller with backoff.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for graph store operations
pub type GraphStoreResult<T> = Result<T, GraphStoreError>;

/// A node returned by full-text search with its text-index score
/// (higher is better; not normalized across stores).
#[derive(Debug, Clone)]
pub struct NodeHit {
    pub node: Node,
    pub score: f32,
}

/// A passage returned by full-text search with its text-index score.
#[derive(Debug, Clone)]
pub struct PassageHit {
    pub passage: Passage,
    pub score: f32,
}

/// Operational counters for the `stats` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub passages: usize,
    pub nodes: usize,
    pub concepts: usize,
    pub relations: usize,
}

/// Trait for graph storage backends
///
/// Read operations serve the retrievers; write operations serve the ingestion
/// pipeline only — nothing on the analysis path mutates the graph.
pub trait GraphStore: Send + Sync {
    // === Retrieval reads ===

    /// Full-text search over node names and labels.
    fn fulltext_node_search(&self, query: &str, k: usize) -> GraphStoreResult<Vec<NodeHit>>;

    /// Full-text search over passage text.
    fn fulltext_passage_search(&self, query: &str, k: usize) -> GraphStoreResult<Vec<PassageHit>>;

    /// Nodes reachable from `node_id` over entity relations within `depth`
    /// hops (capped at 2). `type_filter` restricts the relation type.
    /// The start node itself is not included. Visited ids are deduplicated,
    /// so cyclic relations terminate.
    fn neighbors(
        &self,
        node_id: &NodeId,
        depth: usize,
        type_filter: Option<&str>,
    ) -> GraphStoreResult<Vec<Node>>;

    /// Passages that mention the node, following `MENTIONS` edges.
    fn passages_for_node(&self, node_id: &NodeId) -> GraphStoreResult<Vec<Passage>>;

    /// Concepts attached (via `HAS_CONCEPT`) to nodes whose name equals the
    /// given text, case-insensitively.
    fn concepts_for_text(&self, text: &str) -> GraphStoreResult<Vec<Concept>>;

    /// Passages attached to a concept: concept ← HAS_CONCEPT ← node ←
    /// MENTIONS ← passage.
    fn passages_for_concept(&self, concept_id: &ConceptId) -> GraphStoreResult<Vec<Passage>>;

    // === Point reads ===

    fn get_passage(&self, id: &PassageId) -> GraphStoreResult<Option<Passage>>;

    fn get_concept(&self, id: &ConceptId) -> GraphStoreResult<Option<Concept>>;

    /// All concept ids — used to scope vector searches to concept vectors.
    fn concept_ids(&self) -> GraphStoreResult<Vec<ConceptId>>;

    /// Every indexed passage, id-ascending — used to (re)build the vector
    /// index from graph contents.
    fn all_passages(&self) -> GraphStoreResult<Vec<Passage>>;

    // === Operational ===

    fn list_databases(&self) -> GraphStoreResult<Vec<String>>;

    fn stats(&self) -> GraphStoreResult<GraphStats>;

    // === Ingestion writes ===

    fn add_passage(&self, passage: &Passage) -> GraphStoreResult<()>;

    fn add_node(&self, node: &Node) -> GraphStoreResult<()>;

    fn add_concept(&self, concept: &Concept) -> GraphStoreResult<()>;

    fn add_relation(&self, relation: &Relation) -> GraphStoreResult<()>;
}

/// Maximum traversal depth for `neighbors`. Concept/node cycles are expected
/// in ingested graphs, so traversal is bounded and deduplicated.
pub const MAX_NEIGHBOR_DEPTH: usize = 2;

/// Retry a store operation on `Unavailable`, with exponential backoff
/// starting at 250 ms. Other errors surface immediately.
pub async fn with_store_retry<T, F>(max_attempts: u32, mut op: F) -> GraphStoreResult<T>
where
    F: FnMut() -> GraphStoreResult<T>,
{
    let mut delay = Duration::from_millis(250);
    let mut attempt: u32 = 0;
    loop {
        match op() {
            Err(GraphStoreError::Unavailable(reason)) if attempt + 1 < max_attempts => {
                attempt += 1;
                tracing::warn!(attempt, %reason, "graph store unavailable, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            other => return other,
        }
    }
}

/// Tokenize text for full-text matching: lowercase, split on whitespace,
/// strip surrounding punctuation. Works for non-ASCII scripts because only
/// ASCII punctuation is trimmed.
pub(crate) fn text_terms(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| c.is_ascii_punctuation())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Fraction of query terms present in the candidate terms, in [0, 1].
pub(crate) fn term_match_score(query_terms: &[String], candidate: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let candidate_terms = text_terms(candidate);
    let matched = query_terms
        .iter()
        .filter(|q| candidate_terms.iter().any(|c| c == *q))
        .count();
    matched as f32 / query_terms.len() as f32
}
