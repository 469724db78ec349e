//! SQLite graph store
//!
//! Single database file with passage/node/concept/relation tables and FTS5
//! virtual tables over node names+labels and passage text. Thread-safe via an
//! internal mutex on the connection; WAL mode for concurrent reads.

use super::store::{
    GraphStats, GraphStore, GraphStoreError, GraphStoreResult, NodeHit, PassageHit,
    MAX_NEIGHBOR_DEPTH,
};
use super::types::{rel_type, Concept, ConceptId, Node, NodeId, Passage, PassageId, Relation};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed graph store with FTS5 full-text indices.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> GraphStoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> GraphStoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> GraphStoreResult<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS passages (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                source_id TEXT NOT NULL,
                position INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                labels_json TEXT NOT NULL,
                numeric_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS concepts (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL UNIQUE,
                embedding_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS relations (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                rel_type TEXT NOT NULL,
                properties_json TEXT NOT NULL,
                PRIMARY KEY (source_id, target_id, rel_type)
            );

            CREATE INDEX IF NOT EXISTS idx_relations_source
                ON relations(source_id, rel_type);
            CREATE INDEX IF NOT EXISTS idx_relations_target
                ON relations(target_id, rel_type);

            CREATE VIRTUAL TABLE IF NOT EXISTS passage_fts
                USING fts5(id UNINDEXED, text);
            CREATE VIRTUAL TABLE IF NOT EXISTS node_fts
                USING fts5(id UNINDEXED, name, labels);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_passage(row: &rusqlite::Row<'_>) -> rusqlite::Result<Passage> {
        Ok(Passage {
            id: PassageId::from_string(row.get::<_, String>(0)?),
            text: row.get(1)?,
            source_id: row.get(2)?,
            position: row.get::<_, i64>(3)? as usize,
        })
    }

    fn row_to_node(row: &rusqlite::Row<'_>) -> GraphStoreResult<Node> {
        let labels_json: String = row.get(2)?;
        let labels: BTreeSet<String> = serde_json::from_str(&labels_json)?;
        Ok(Node {
            id: NodeId::from_string(row.get::<_, String>(0)?),
            name: row.get(1)?,
            labels,
            numeric_id: row.get::<_, i64>(3)? as u64,
        })
    }

    fn row_to_concept(row: &rusqlite::Row<'_>) -> GraphStoreResult<Concept> {
        let embedding_json: String = row.get(2)?;
        let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
        Ok(Concept {
            id: ConceptId::from_string(row.get::<_, String>(0)?),
            text: row.get(1)?,
            embedding,
        })
    }
}

/// Build an FTS5 MATCH expression from free text: quoted terms joined with
/// OR, so user punctuation can never produce a syntax error. Returns None
/// when no searchable term remains.
fn fts_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = super::store::text_terms(query)
        .into_iter()
        .map(|t| t.replace('"', ""))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

impl GraphStore for SqliteGraphStore {
    fn fulltext_node_search(&self, query: &str, k: usize) -> GraphStoreResult<Vec<NodeHit>> {
        let Some(expr) = fts_match_expr(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT f.id, -bm25(node_fts) AS score
             FROM node_fts f
             WHERE node_fts MATCH ?1
             ORDER BY score DESC, f.id ASC
             LIMIT ?2",
        )?;
        let scored: Vec<(String, f32)> = stmt
            .query_map(params![expr, k as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)? as f32))
            })?
            .collect::<Result<_, _>>()?;

        let mut hits = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            let node = conn
                .query_row(
                    "SELECT id, name, labels_json, numeric_id FROM nodes WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;
            if let Some((id, name, labels_json, numeric_id)) = node {
                let labels: BTreeSet<String> = serde_json::from_str(&labels_json)?;
                hits.push(NodeHit {
                    node: Node {
                        id: NodeId::from_string(id),
                        name,
                        labels,
                        numeric_id: numeric_id as u64,
                    },
                    score,
                });
            }
        }
        Ok(hits)
    }

    fn fulltext_passage_search(&self, query: &str, k: usize) -> GraphStoreResult<Vec<PassageHit>> {
        let Some(expr) = fts_match_expr(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT f.id, -bm25(passage_fts) AS score
             FROM passage_fts f
             WHERE passage_fts MATCH ?1
             ORDER BY score DESC, f.id ASC
             LIMIT ?2",
        )?;
        let scored: Vec<(String, f32)> = stmt
            .query_map(params![expr, k as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)? as f32))
            })?
            .collect::<Result<_, _>>()?;

        let mut hits = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            let passage = conn
                .query_row(
                    "SELECT id, text, source_id, position FROM passages WHERE id = ?1",
                    params![id],
                    Self::row_to_passage,
                )
                .optional()?;
            if let Some(passage) = passage {
                hits.push(PassageHit { passage, score });
            }
        }
        Ok(hits)
    }

    fn neighbors(
        &self,
        node_id: &NodeId,
        depth: usize,
        type_filter: Option<&str>,
    ) -> GraphStoreResult<Vec<Node>> {
        let depth = depth.min(MAX_NEIGHBOR_DEPTH);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, rel_type FROM relations
             WHERE (source_id = ?1 OR target_id = ?1)
               AND rel_type NOT IN (?2, ?3)",
        )?;

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(node_id.as_str().to_string());
        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        frontier.push_back((node_id.as_str().to_string(), 0));
        let mut found_ids: Vec<String> = Vec::new();

        while let Some((current, hop)) = frontier.pop_front() {
            if hop >= depth {
                continue;
            }
            let edges: Vec<(String, String, String)> = stmt
                .query_map(
                    params![current, rel_type::MENTIONS, rel_type::HAS_CONCEPT],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?
                .collect::<Result<_, _>>()?;
            for (source, target, rel) in edges {
                if let Some(filter) = type_filter {
                    if rel != filter {
                        continue;
                    }
                }
                let other = if source == current { target } else { source };
                if !visited.insert(other.clone()) {
                    continue;
                }
                found_ids.push(other.clone());
                frontier.push_back((other, hop + 1));
            }
        }

        found_ids.sort();
        let mut nodes = Vec::with_capacity(found_ids.len());
        for id in found_ids {
            let node = conn
                .query_row(
                    "SELECT id, name, labels_json, numeric_id FROM nodes WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;
            if let Some((id, name, labels_json, numeric_id)) = node {
                let labels: BTreeSet<String> = serde_json::from_str(&labels_json)?;
                nodes.push(Node {
                    id: NodeId::from_string(id),
                    name,
                    labels,
                    numeric_id: numeric_id as u64,
                });
            }
        }
        Ok(nodes)
    }

    fn passages_for_node(&self, node_id: &NodeId) -> GraphStoreResult<Vec<Passage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.text, p.source_id, p.position
             FROM passages p
             JOIN relations r ON r.source_id = p.id
             WHERE r.rel_type = ?1 AND r.target_id = ?2
             ORDER BY p.id ASC",
        )?;
        let passages = stmt
            .query_map(params![rel_type::MENTIONS, node_id.as_str()], Self::row_to_passage)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(passages)
    }

    fn concepts_for_text(&self, text: &str) -> GraphStoreResult<Vec<Concept>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT c.id, c.text, c.embedding_json
             FROM concepts c
             JOIN relations r ON r.target_id = c.id AND r.rel_type = ?1
             JOIN nodes n ON n.id = r.source_id
             WHERE lower(n.name) = lower(?2)
             ORDER BY c.id ASC",
        )?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![rel_type::HAS_CONCEPT, text], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<_, _>>()?;
        rows.into_iter()
            .map(|(id, text, embedding_json)| {
                let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
                Ok(Concept {
                    id: ConceptId::from_string(id),
                    text,
                    embedding,
                })
            })
            .collect()
    }

    fn passages_for_concept(&self, concept_id: &ConceptId) -> GraphStoreResult<Vec<Passage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT p.id, p.text, p.source_id, p.position
             FROM passages p
             JOIN relations m ON m.source_id = p.id AND m.rel_type = ?1
             JOIN relations h ON h.source_id = m.target_id AND h.rel_type = ?2
             WHERE h.target_id = ?3
             ORDER BY p.id ASC",
        )?;
        let passages = stmt
            .query_map(
                params![rel_type::MENTIONS, rel_type::HAS_CONCEPT, concept_id.as_str()],
                Self::row_to_passage,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(passages)
    }

    fn get_passage(&self, id: &PassageId) -> GraphStoreResult<Option<Passage>> {
        let conn = self.conn.lock().unwrap();
        let passage = conn
            .query_row(
                "SELECT id, text, source_id, position FROM passages WHERE id = ?1",
                params![id.as_str()],
                Self::row_to_passage,
            )
            .optional()?;
        Ok(passage)
    }

    fn get_concept(&self, id: &ConceptId) -> GraphStoreResult<Option<Concept>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT id, text, embedding_json FROM concepts WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(|(id, text, embedding_json)| {
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
            Ok(Concept {
                id: ConceptId::from_string(id),
                text,
                embedding,
            })
        })
        .transpose()
    }

    fn concept_ids(&self) -> GraphStoreResult<Vec<ConceptId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM concepts ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(ConceptId::from_string).collect())
    }

    fn all_passages(&self) -> GraphStoreResult<Vec<Passage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, text, source_id, position FROM passages ORDER BY id ASC")?;
        let passages = stmt
            .query_map([], Self::row_to_passage)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(passages)
    }

    fn list_databases(&self) -> GraphStoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("PRAGMA database_list")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn stats(&self) -> GraphStoreResult<GraphStats> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> GraphStoreResult<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        };
        Ok(GraphStats {
            passages: count("passages")?,
            nodes: count("nodes")?,
            concepts: count("concepts")?,
            relations: count("relations")?,
        })
    }

    fn add_passage(&self, passage: &Passage) -> GraphStoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO passages(id, text, source_id, position)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                passage.id.as_str(),
                passage.text,
                passage.source_id,
                passage.position as i64
            ],
        )?;
        conn.execute(
            "DELETE FROM passage_fts WHERE id = ?1",
            params![passage.id.as_str()],
        )?;
        conn.execute(
            "INSERT INTO passage_fts(id, text) VALUES (?1, ?2)",
            params![passage.id.as_str(), passage.text],
        )?;
        Ok(())
    }

    fn add_node(&self, node: &Node) -> GraphStoreResult<()> {
        if node.labels.is_empty() {
            return Err(GraphStoreError::InvalidRecord(format!(
                "node {} has no labels",
                node.id
            )));
        }
        let labels_json = serde_json::to_string(&node.labels)?;
        let labels_text = node.labels.iter().cloned().collect::<Vec<_>>().join(" ");
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO nodes(id, name, labels_json, numeric_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                node.id.as_str(),
                node.name,
                labels_json,
                node.numeric_id as i64
            ],
        )?;
        conn.execute("DELETE FROM node_fts WHERE id = ?1", params![node.id.as_str()])?;
        conn.execute(
            "INSERT INTO node_fts(id, name, labels) VALUES (?1, ?2, ?3)",
            params![node.id.as_str(), node.name, labels_text],
        )?;
        Ok(())
    }

    fn add_concept(&self, concept: &Concept) -> GraphStoreResult<()> {
        let embedding_json = serde_json::to_string(&concept.embedding)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO concepts(id, text, embedding_json)
             VALUES (?1, ?2, ?3)",
            params![concept.id.as_str(), concept.text, embedding_json],
        )?;
        Ok(())
    }

    fn add_relation(&self, relation: &Relation) -> GraphStoreResult<()> {
        let properties_json = serde_json::to_string(&relation.properties)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO relations(source_id, target_id, rel_type, properties_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                relation.source_id,
                relation.target_id,
                relation.rel_type,
                properties_json
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> SqliteGraphStore {
        let store = SqliteGraphStore::open_in_memory().unwrap();
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
                "Either party may terminate this agreement for material breach.",
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
            .add_concept(&Concept::new("payment terms", vec![1.0, 0.0]))
            .unwrap();
        store
            .add_relation(&Relation::mentions(&"p1".into(), &"n1".into()))
            .unwrap();
        store
            .add_relation(&Relation::mentions(&"p2".into(), &"n2".into()))
            .unwrap();
        store
            .add_relation(&Relation::relates(&"n1".into(), &"n2".into(), "RELATES"))
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
    fn fts_passage_search_finds_matches() {
        let store = seeded_store();
        let hits = store.fulltext_passage_search("payment invoice", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage.id.as_str(), "p1");
        assert!(hits[0].score >= 0.0);
    }

    #[test]
    fn fts_node_search_finds_by_name() {
        let store = seeded_store();
        let hits = store.fulltext_node_search("termination", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.id.as_str(), "n2");
    }

    #[test]
    fn fts_query_with_punctuation_is_safe() {
        let store = seeded_store();
        // FTS5 operators in raw text must not cause syntax errors
        let hits = store
            .fulltext_passage_search("payment AND (due) OR \"x", 10)
            .unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn empty_query_returns_empty() {
        let store = seeded_store();
        assert!(store.fulltext_passage_search("  ", 10).unwrap().is_empty());
    }

    #[test]
    fn neighbors_and_mentions_traversal() {
        let store = seeded_store();
        let neighbors = store.neighbors(&"n1".into(), 1, None).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].id.as_str(), "n2");

        let passages = store.passages_for_node(&"n1".into()).unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].id.as_str(), "p1");
    }

    #[test]
    fn concept_round_trip_preserves_embedding() {
        let store = seeded_store();
        let concept = store
            .get_concept(&ConceptId::from_string("concept:payment-terms"))
            .unwrap()
            .unwrap();
        assert_eq!(concept.embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn passages_for_concept_joins_both_edges() {
        let store = seeded_store();
        let passages = store
            .passages_for_concept(&ConceptId::from_string("concept:payment-terms"))
            .unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].id.as_str(), "p1");
    }

    #[test]
    fn reindexing_a_passage_does_not_duplicate_fts_rows() {
        let store = seeded_store();
        store
            .add_passage(&Passage::new(
                "p1",
                "Payment is due within thirty days of invoice.",
                "contract-1",
                0,
            ))
            .unwrap();
        let hits = store.fulltext_passage_search("payment", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        {
            let store = SqliteGraphStore::open(&path).unwrap();
            store
                .add_passage(&Passage::new("p1", "Some clause text.", "c1", 0))
                .unwrap();
        }
        let store = SqliteGraphStore::open(&path).unwrap();
        assert_eq!(store.stats().unwrap().passages, 1);
    }
}
