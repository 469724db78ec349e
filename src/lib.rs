//! LexGraph: Retrieval-Augmented Contract-Risk Analyzer
//!
//! Contracts are indexed into a hybrid knowledge store — a property graph of
//! entities and relations plus per-passage vector embeddings — and analyzed
//! against a fixed ten-part legal checklist. Each part runs a hybrid
//! retrieval (graph search, concept expansion, dense search) and asks a
//! language model to score and explain every checklist item.
//!
//! # Core Concepts
//!
//! - **Passages**: atomic units of indexed contract text
//! - **Nodes / Concepts**: entities and noun phrases bridging queries to the graph
//! - **Hybrid retrieval**: weighted fusion of four retrieval channels
//! - **Analysis session**: a cancelable, resumable run of the checklist
//!
//! # Example
//!
//! ```
//! use lexgraph::{ChecklistCatalog, MemoryGraphStore};
//!
//! let catalog = ChecklistCatalog::builtin();
//! assert_eq!(catalog.parts.len(), 10);
//! let store = MemoryGraphStore::new();
//! // Store is ready for ingestion
//! ```

pub mod analyzer;
mod api;
pub mod checklist;
pub mod concepts;
pub mod config;
pub mod embedding;
pub mod graph;
pub mod llm;
pub mod retrieval;
pub mod session;
pub mod vector;

pub use analyzer::{
    AnalysisOrchestrator, AnalysisSession, AnalyzerSettings, CancellationToken, GptOnlyAnalyzer,
    HybridPartAnalyzer, IntegratedReport, ItemResult, ItemStatus, PartAnalyzer, PartRecord,
    PartResult, RiskLevel, SessionId, SessionStatus, SessionSummary,
};
pub use api::{AnalyzerBackend, ApiError, LexGraphApi, StartAnalysisRequest, StatusView};
pub use checklist::{CatalogError, ChecklistCatalog, ChecklistItem, ChecklistPart};
pub use concepts::{ConceptExtractor, ExtractorError};
pub use config::{Config, ConfigError};
pub use embedding::{Embedder, EmbeddingError, HashEmbedder, HttpEmbedder};
pub use graph::{
    Concept, ConceptId, GraphStats, GraphStore, GraphStoreError, MemoryGraphStore, Node, NodeId,
    Passage, PassageId, Relation, SqliteGraphStore,
};
pub use llm::{
    ChatClient, ChatRequest, ChatResponse, HttpChatClient, LlmError, RateGovernor, RetryPolicy,
    ScriptedChatClient,
};
pub use retrieval::{
    HippoRetriever, HybridResult, HybridRetriever, HybridSearchStats, HybridWeights, LkgRetriever,
    RetrievalError,
};
pub use session::{SessionHandle, SessionRegistry, SessionStore};
pub use vector::{IdFilter, MemoryVectorIndex, VectorError, VectorHit, VectorIndex};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
