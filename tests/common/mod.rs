//! Shared fixtures for integration tests: a three-passage corpus, fast
//! (delay-free) configuration, and API wiring over mock clients.

#![allow(dead_code)]

use lexgraph::{
    Config, Embedder, GraphStore, HashEmbedder, IdFilter, LexGraphApi, MemoryGraphStore,
    MemoryVectorIndex, Node, Passage, Relation, ScriptedChatClient, SessionId, StatusView,
    VectorError, VectorHit, VectorIndex,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const P1: &str = "Payment is due within thirty days of invoice receipt.";
pub const P2: &str = "Either party may terminate this agreement for material breach.";
pub const P3: &str = "All confidential information must be protected for five years.";

pub const PASS_JSON: &str =
    r#"{"status":"PASS","risk_score":0,"analysis":"fine","recommendation":""}"#;
pub const DANGER_JSON: &str =
    r#"{"status":"DANGER","risk_score":5,"analysis":"x","recommendation":"y"}"#;

/// Seed the canonical three-passage corpus into a store + index pair.
pub async fn seed_corpus(
    store: &dyn GraphStore,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
) {
    for (i, (id, text)) in [("P1", P1), ("P2", P2), ("P3", P3)].iter().enumerate() {
        let passage = Passage::new(*id, *text, "contract-1", i);
        store.add_passage(&passage).unwrap();
        let vector = embedder
            .embed_batch(&[text.to_string()])
            .await
            .unwrap()
            .remove(0);
        index.upsert(id, vector).unwrap();
    }
    store
        .add_node(&Node::new("n1", "Payment", "Entity", 1))
        .unwrap();
    store
        .add_node(&Node::new("n2", "Termination", "Entity", 2))
        .unwrap();
    store
        .add_relation(&Relation::mentions(&"P1".into(), &"n1".into()))
        .unwrap();
    store
        .add_relation(&Relation::mentions(&"P2".into(), &"n2".into()))
        .unwrap();
}

/// Config with no pacing delays, for fast tests.
pub fn fast_config() -> Config {
    Config {
        rate_limit_delay: 0.0,
        ..Config::default()
    }
}

/// Wire an API over the seeded in-memory corpus and a scripted chat client.
pub async fn api_over_corpus(chat: ScriptedChatClient, sessions_dir: &Path) -> LexGraphApi {
    let embedder = Arc::new(HashEmbedder::default());
    let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
    let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(embedder.dimensions()));
    seed_corpus(store.as_ref(), index.as_ref(), embedder.as_ref()).await;
    LexGraphApi::build(
        &fast_config(),
        store,
        index,
        embedder,
        Arc::new(chat),
        sessions_dir,
    )
    .unwrap()
}

/// Wire an API whose vector index is down, leaving only the graph channels.
pub async fn api_with_broken_index(
    chat: ScriptedChatClient,
    sessions_dir: &Path,
) -> LexGraphApi {
    let embedder = Arc::new(HashEmbedder::default());
    let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
    // Seed only the graph half; the broken index never holds vectors
    let scratch = MemoryVectorIndex::new(embedder.dimensions());
    seed_corpus(store.as_ref(), &scratch, embedder.as_ref()).await;
    LexGraphApi::build(
        &fast_config(),
        store,
        Arc::new(BrokenIndex),
        embedder,
        Arc::new(chat),
        sessions_dir,
    )
    .unwrap()
}

/// Poll until the session reaches a terminal state.
pub async fn wait_terminal(api: &LexGraphApi, id: &SessionId) -> StatusView {
    for _ in 0..2000 {
        let status = api.get_status(id).unwrap();
        if status.status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {} never reached a terminal state", id);
}

/// A vector index whose every operation fails.
pub struct BrokenIndex;

impl VectorIndex for BrokenIndex {
    fn dimensions(&self) -> usize {
        64
    }

    fn upsert(&self, _id: &str, _vector: Vec<f32>) -> Result<(), VectorError> {
        Err(VectorError::Backend("index offline".to_string()))
    }

    fn search(
        &self,
        _vector: &[f32],
        _k: usize,
        _filter: Option<&IdFilter>,
    ) -> Result<Vec<VectorHit>, VectorError> {
        Err(VectorError::Backend("index offline".to_string()))
    }

    fn get(&self, _id: &str) -> Result<Option<Vec<f32>>, VectorError> {
        Err(VectorError::Backend("index offline".to_string()))
    }
}
