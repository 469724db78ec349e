//! Record types for the contract knowledge graph
//!
//! Passages, entity nodes, concepts, and typed relations are populated by the
//! ingestion pipeline and read-only for the analyzer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Unique identifier for an indexed passage
///
/// Serializes as a plain string (e.g. "contract-7:p3").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassageId(String);

impl PassageId {
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PassageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PassageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PassageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for an entity node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for a concept vertex
///
/// Derived from the normalized concept text, e.g. "concept:payment-terms".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptId(String);

impl ConceptId {
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the canonical id for a normalized concept text.
    pub fn for_text(normalized: &str) -> Self {
        let slug: String = normalized
            .chars()
            .map(|c| if c.is_whitespace() { '-' } else { c })
            .collect();
        Self(format!("concept:{}", slug))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConceptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConceptId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Prefix shared by all concept ids — used to partition the vector index
/// between passage and concept embeddings.
pub const CONCEPT_ID_PREFIX: &str = "concept:";

/// An atomic unit of indexed contract text.
///
/// Immutable after indexing; each indexed passage has exactly one embedding
/// in the vector index keyed by its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,
    pub text: String,
    /// Identifier of the source document the passage was cut from
    pub source_id: String,
    /// Ordinal position of the passage within its source
    pub position: usize,
}

impl Passage {
    pub fn new(
        id: impl Into<PassageId>,
        text: impl Into<String>,
        source_id: impl Into<String>,
        position: usize,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_id: source_id.into(),
            position,
        }
    }
}

/// An entity vertex extracted during ingestion.
///
/// `name` is the canonical surface form; `labels` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub labels: BTreeSet<String>,
    pub numeric_id: u64,
}

impl Node {
    /// Create a node with a single label.
    pub fn new(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        label: impl Into<String>,
        numeric_id: u64,
    ) -> Self {
        let mut labels = BTreeSet::new();
        labels.insert(label.into());
        Self {
            id: id.into(),
            name: name.into(),
            labels,
            numeric_id,
        }
    }

    /// Add an additional label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }
}

/// A short noun phrase bridging free-text queries and graph nodes.
///
/// Unique by normalized text; linked to nodes via `HAS_CONCEPT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl Concept {
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        let text = text.into();
        let normalized = normalize_concept_text(&text);
        Self {
            id: ConceptId::for_text(&normalized),
            text: normalized,
            embedding,
        }
    }
}

/// Normalize concept text: lowercase, collapse internal whitespace.
pub fn normalize_concept_text(text: &str) -> String {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Well-known relation types
pub mod rel_type {
    /// Entity → entity
    pub const RELATES: &str = "RELATES";
    /// Passage → entity it mentions
    pub const MENTIONS: &str = "MENTIONS";
    /// Entity → concept
    pub const HAS_CONCEPT: &str = "HAS_CONCEPT";
}

/// Typed property values on relations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// A directed, typed edge. Multi-edges between the same endpoints are
/// permitted and distinguished by `rel_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: String,
    pub target_id: String,
    pub rel_type: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
}

impl Relation {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        rel_type: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            rel_type: rel_type.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Passage → node mention edge.
    pub fn mentions(passage: &PassageId, node: &NodeId) -> Self {
        Self::new(passage.as_str(), node.as_str(), rel_type::MENTIONS)
    }

    /// Node → concept edge.
    pub fn has_concept(node: &NodeId, concept: &ConceptId) -> Self {
        Self::new(node.as_str(), concept.as_str(), rel_type::HAS_CONCEPT)
    }

    /// Node → node edge with a verb-phrase type.
    pub fn relates(source: &NodeId, target: &NodeId, verb: &str) -> Self {
        Self::new(source.as_str(), target.as_str(), verb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concept_normalizes_text_and_derives_id() {
        let c = Concept::new("  Payment   TERMS ", vec![0.1, 0.2]);
        assert_eq!(c.text, "payment terms");
        assert_eq!(c.id.as_str(), "concept:payment-terms");
    }

    #[test]
    fn node_labels_accumulate() {
        let n = Node::new("n1", "Acme Corp", "Entity", 1).with_label("Organization");
        assert_eq!(n.labels.len(), 2);
        assert!(n.labels.contains("Entity"));
        assert!(n.labels.contains("Organization"));
    }

    #[test]
    fn relation_helpers_use_well_known_types() {
        let p = PassageId::from("p1");
        let n = NodeId::from("n1");
        let m = Relation::mentions(&p, &n);
        assert_eq!(m.rel_type, rel_type::MENTIONS);
        assert_eq!(m.source_id, "p1");
        assert_eq!(m.target_id, "n1");
    }

    #[test]
    fn passage_id_serializes_transparent() {
        let id = PassageId::from("p1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"p1\"");
    }
}
