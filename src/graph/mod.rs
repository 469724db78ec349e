//! Contract knowledge graph: record types and storage backends

mod memory;
mod sqlite;
mod store;
mod types;

pub use memory::MemoryGraphStore;
pub use sqlite::SqliteGraphStore;
pub use store::{
    with_store_retry, GraphStats, GraphStore, GraphStoreError, GraphStoreResult, NodeHit,
    PassageHit, MAX_NEIGHBOR_DEPTH,
};
pub use types::{
    normalize_concept_text, rel_type, Concept, ConceptId, Node, NodeId, Passage, PassageId,
    PropertyValue, Relation, CONCEPT_ID_PREFIX,
};
