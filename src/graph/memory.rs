//! In-memory graph store
//!
//! The test and local-mode backend. Full-text scoring is term-overlap based;
//! iteration order is deterministic (BTreeMap), so equal scores tie-break by
//! id ascending for free.

use super::store::{
    text_terms, term_match_score, GraphStats, GraphStore, GraphStoreResult, NodeHit, PassageHit,
    MAX_NEIGHBOR_DEPTH,
};
use super::types::{rel_type, Concept, ConceptId, Node, NodeId, Passage, PassageId, Relation};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::RwLock;

#[derive(Default)]
struct Inner {
    passages: BTreeMap<PassageId, Passage>,
    nodes: BTreeMap<NodeId, Node>,
    concepts: BTreeMap<ConceptId, Concept>,
    relations: Vec<Relation>,
}

/// Thread-safe in-memory graph store.
pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for MemoryGraphStore {
    fn fulltext_node_search(&self, query: &str, k: usize) -> GraphStoreResult<Vec<NodeHit>> {
        let terms = text_terms(query);
        let inner = self.inner.read().unwrap();
        let mut hits: Vec<NodeHit> = inner
            .nodes
            .values()
            .filter_map(|node| {
                let haystack = format!(
                    "{} {}",
                    node.name,
                    node.labels.iter().cloned().collect::<Vec<_>>().join(" ")
                );
                let score = term_match_score(&terms, &haystack);
                (score > 0.0).then(|| NodeHit {
                    node: node.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.node.id.cmp(&b.node.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn fulltext_passage_search(&self, query: &str, k: usize) -> GraphStoreResult<Vec<PassageHit>> {
        let terms = text_terms(query);
        let inner = self.inner.read().unwrap();
        let mut hits: Vec<PassageHit> = inner
            .passages
            .values()
            .filter_map(|passage| {
                let score = term_match_score(&terms, &passage.text);
                (score > 0.0).then(|| PassageHit {
                    passage: passage.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.passage.id.cmp(&b.passage.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn neighbors(
        &self,
        node_id: &NodeId,
        depth: usize,
        type_filter: Option<&str>,
    ) -> GraphStoreResult<Vec<Node>> {
        let depth = depth.min(MAX_NEIGHBOR_DEPTH);
        let inner = self.inner.read().unwrap();

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(node_id.as_str().to_string());
        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        frontier.push_back((node_id.as_str().to_string(), 0));
        let mut found: Vec<Node> = Vec::new();

        while let Some((current, hop)) = frontier.pop_front() {
            if hop >= depth {
                continue;
            }
            for rel in inner.relations.iter() {
                if rel.rel_type == rel_type::MENTIONS || rel.rel_type == rel_type::HAS_CONCEPT {
                    continue;
                }
                if let Some(filter) = type_filter {
                    if rel.rel_type != filter {
                        continue;
                    }
                }
                let other = if rel.source_id == current {
                    &rel.target_id
                } else if rel.target_id == current {
                    &rel.source_id
                } else {
                    continue;
                };
                if !visited.insert(other.clone()) {
                    continue;
                }
                if let Some(node) = inner.nodes.get(&NodeId::from_string(other.clone())) {
                    found.push(node.clone());
                    frontier.push_back((other.clone(), hop + 1));
                }
            }
        }

        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn passages_for_node(&self, node_id: &NodeId) -> GraphStoreResult<Vec<Passage>> {
        let inner = self.inner.read().unwrap();
        let mut passages: Vec<Passage> = inner
            .relations
            .iter()
            .filter(|r| r.rel_type == rel_type::MENTIONS && r.target_id == node_id.as_str())
            .filter_map(|r| {
                inner
                    .passages
                    .get(&PassageId::from_string(r.source_id.clone()))
                    .cloned()
            })
            .collect();
        passages.sort_by(|a, b| a.id.cmp(&b.id));
        passages.dedup_by(|a, b| a.id == b.id);
        Ok(passages)
    }

    fn concepts_for_text(&self, text: &str) -> GraphStoreResult<Vec<Concept>> {
        let needle = text.to_lowercase();
        let inner = self.inner.read().unwrap();
        let node_ids: HashSet<&str> = inner
            .nodes
            .values()
            .filter(|n| n.name.to_lowercase() == needle)
            .map(|n| n.id.as_str())
            .collect();
        let mut concepts: Vec<Concept> = inner
            .relations
            .iter()
            .filter(|r| r.rel_type == rel_type::HAS_CONCEPT && node_ids.contains(r.source_id.as_str()))
            .filter_map(|r| {
                inner
                    .concepts
                    .get(&ConceptId::from_string(r.target_id.clone()))
                    .cloned()
            })
            .collect();
        concepts.sort_by(|a, b| a.id.cmp(&b.id));
        concepts.dedup_by(|a, b| a.id == b.id);
        Ok(concepts)
    }

    fn passages_for_concept(&self, concept_id: &ConceptId) -> GraphStoreResult<Vec<Passage>> {
        let inner = self.inner.read().unwrap();
        let node_ids: HashSet<&str> = inner
            .relations
            .iter()
            .filter(|r| r.rel_type == rel_type::HAS_CONCEPT && r.target_id == concept_id.as_str())
            .map(|r| r.source_id.as_str())
            .collect();
        let mut passages: Vec<Passage> = inner
            .relations
            .iter()
            .filter(|r| r.rel_type == rel_type::MENTIONS && node_ids.contains(r.target_id.as_str()))
            .filter_map(|r| {
                inner
                    .passages
                    .get(&PassageId::from_string(r.source_id.clone()))
                    .cloned()
            })
            .collect();
        passages.sort_by(|a, b| a.id.cmp(&b.id));
        passages.dedup_by(|a, b| a.id == b.id);
        Ok(passages)
    }

    fn get_passage(&self, id: &PassageId) -> GraphStoreResult<Option<Passage>> {
        Ok(self.inner.read().unwrap().passages.get(id).cloned())
    }

    fn get_concept(&self, id: &ConceptId) -> GraphStoreResult<Option<Concept>> {
        Ok(self.inner.read().unwrap().concepts.get(id).cloned())
    }

    fn concept_ids(&self) -> GraphStoreResult<Vec<ConceptId>> {
        Ok(self.inner.read().unwrap().concepts.keys().cloned().collect())
    }

    fn all_passages(&self) -> GraphStoreResult<Vec<Passage>> {
        Ok(self.inner.read().unwrap().passages.values().cloned().collect())
    }

    fn list_databases(&self) -> GraphStoreResult<Vec<String>> {
        Ok(vec!["memory".to_string()])
    }

    fn stats(&self) -> GraphStoreResult<GraphStats> {
        let inner = self.inner.read().unwrap();
        Ok(GraphStats {
            passages: inner.passages.len(),
            nodes: inner.nodes.len(),
            concepts: inner.concepts.len(),
            relations: inner.relations.len(),
        })
    }

    fn add_passage(&self, passage: &Passage) -> GraphStoreResult<()> {
        self.inner
            .write()
            .unwrap()
            .passages
            .insert(passage.id.clone(), passage.clone());
        Ok(())
    }

    fn add_node(&self, node: &Node) -> GraphStoreResult<()> {
        if node.labels.is_empty() {
            return Err(super::store::GraphStoreError::InvalidRecord(format!(
                "node {} has no labels",
                node.id
            )));
        }
        self.inner
            .write()
            .unwrap()
            .nodes
            .insert(node.id.clone(), node.clone());
        Ok(())
    }

    fn add_concept(&self, concept: &Concept) -> GraphStoreResult<()> {
        self.inner
            .write()
            .unwrap()
            .concepts
            .insert(concept.id.clone(), concept.clone());
        Ok(())
    }

    fn add_relation(&self, relation: &Relation) -> GraphStoreResult<()> {
        let mut inner = self.inner.write().unwrap();
        // Multi-edges are keyed by (source, target, type)
        let exists = inner.relations.iter().any(|r| {
            r.source_id == relation.source_id
                && r.target_id == relation.target_id
                && r.rel_type == relation.rel_type
        });
        if !exists {
            inner.relations.push(relation.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> MemoryGraphStore {
        let store = MemoryGraphStore::new();
        store
            .add_passage(&Passage::new(
                "p1",
                "Payment is due within thirty days of invoice.",
                "contract-1",
                0,
            ))
            .unwrap();
        store
            .add_passage(&Passage::new(
                "p2",
                "Either party may terminate for material breach.",
                "contract-1",
                1,
            ))
            .unwrap();
        store
            .add_node(&Node::new("n1", "Payment", "Entity", 1))
            .unwrap();
        store
            .add_node(&Node::new("n2", "Termination", "Entity", 2))
            .unwrap();
        store
            .add_node(&Node::new("n3", "Invoice", "Entity", 3))
            .unwrap();
        store
            .add_concept(&Concept::new("payment terms", vec![1.0, 0.0]))
            .unwrap();
        store
            .add_relation(&Relation::mentions(&"p1".into(), &"n1".into()))
            .unwrap();
        store
            .add_relation(&Relation::mentions(&"p2".into(), &"n2".into()))
            .unwrap();
        store
            .add_relation(&Relation::mentions(&"p1".into(), &"n3".into()))
            .unwrap();
        store
            .add_relation(&Relation::relates(&"n1".into(), &"n3".into(), "BILLED_VIA"))
            .unwrap();
        store
            .add_relation(&Relation::has_concept(
                &"n1".into(),
                &ConceptId::from_string("concept:payment-terms"),
            ))
            .unwrap();
        store
    }

    #[test]
    fn fulltext_passage_search_ranks_by_overlap() {
        let store = seeded_store();
        let hits = store.fulltext_passage_search("payment due", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage.id.as_str(), "p1");
    }

    #[test]
    fn fulltext_node_search_matches_labels() {
        let store = seeded_store();
        let hits = store.fulltext_node_search("Entity", 10).unwrap();
        assert_eq!(hits.len(), 3);
        // Ties broken by id ascending
        assert_eq!(hits[0].node.id.as_str(), "n1");
    }

    #[test]
    fn neighbors_follow_entity_relations_only() {
        let store = seeded_store();
        let neighbors = store.neighbors(&"n1".into(), 1, None).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].id.as_str(), "n3");
    }

    #[test]
    fn neighbors_depth_is_capped_and_cycles_terminate() {
        let store = seeded_store();
        store
            .add_relation(&Relation::relates(&"n3".into(), &"n1".into(), "CYCLES"))
            .unwrap();
        let neighbors = store.neighbors(&"n1".into(), 5, None).unwrap();
        // Depth capped at 2; the cycle back to n1 is deduplicated
        assert_eq!(neighbors.len(), 1);
    }

    #[test]
    fn passages_for_node_follows_mentions() {
        let store = seeded_store();
        let passages = store.passages_for_node(&"n3".into()).unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].id.as_str(), "p1");
    }

    #[test]
    fn concepts_for_text_is_case_insensitive() {
        let store = seeded_store();
        let concepts = store.concepts_for_text("payment").unwrap();
        assert_eq!(concepts.len(), 1);
        assert_eq!(concepts[0].text, "payment terms");
    }

    #[test]
    fn passages_for_concept_walks_back_to_passages() {
        let store = seeded_store();
        let passages = store
            .passages_for_concept(&ConceptId::from_string("concept:payment-terms"))
            .unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].id.as_str(), "p1");
    }

    #[test]
    fn node_without_labels_is_rejected() {
        let store = MemoryGraphStore::new();
        let mut node = Node::new("n1", "X", "Entity", 1);
        node.labels.clear();
        assert!(store.add_node(&node).is_err());
    }

    #[test]
    fn stats_count_records() {
        let store = seeded_store();
        let stats = store.stats().unwrap();
        assert_eq!(stats.passages, 2);
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.concepts, 1);
        assert_eq!(stats.relations, 5);
    }
}
