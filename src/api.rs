//! Transport-independent API layer
//!
//! `LexGraphApi` is the single entry point for consumer-facing operations.
//! Transports (CLI, HTTP, direct embedding) call these methods — they never
//! reach into the orchestrator, retrievers, or stores directly. Every
//! operation surfaces a typed `ApiError`; nothing here terminates the
//! process.

use crate::analyzer::{
    AnalysisOrchestrator, AnalysisSession, AnalyzerSettings, GptOnlyAnalyzer, HybridPartAnalyzer,
    IntegratedReport, PartAnalyzer, PartRecord, SessionId, SessionStatus, SessionSummary,
};
use crate::checklist::ChecklistCatalog;
use crate::concepts::ConceptExtractor;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::graph::{GraphStore, GraphStoreError};
use crate::llm::{ChatClient, RateGovernor, RetryPolicy};
use crate::retrieval::{
    HippoRetriever, HybridResult, HybridRetriever, HybridWeights, LkgRetriever, RetrievalError,
};
use crate::session::{SessionHandle, SessionRegistry, SessionStore, SessionStoreError};
use crate::vector::VectorIndex;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Caller-facing error taxonomy. Transports map these onto their own status
/// codes (4xx for the first three, 5xx-shaped for the rest).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RetrievalError> for ApiError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Unavailable(reason) => ApiError::RetrievalUnavailable(reason),
            RetrievalError::Store(GraphStoreError::Unavailable(reason)) => {
                ApiError::StoreUnavailable(reason)
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SessionStoreError> for ApiError {
    fn from(err: SessionStoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Which part-analysis backend a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerBackend {
    #[default]
    Hybrid,
    /// Retrieval-free baseline over the raw contract text
    GptOnly,
}

/// Input to `start_analysis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAnalysisRequest {
    pub contract_id: String,
    pub contract_name: String,
    pub contract_text: String,
    /// Defaults to all ten parts
    #[serde(default)]
    pub selected_parts: Option<Vec<u8>>,
    #[serde(default)]
    pub backend: AnalyzerBackend,
}

/// Output of `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusView {
    pub status: SessionStatus,
    pub progress: u8,
    pub message: String,
    pub completed_parts: Vec<u8>,
}

/// The consumer-facing facade over the analysis core.
pub struct LexGraphApi {
    catalog: Arc<ChecklistCatalog>,
    registry: Arc<SessionRegistry>,
    sessions: Arc<SessionStore>,
    orchestrator: Arc<AnalysisOrchestrator>,
    hybrid_analyzer: Arc<dyn PartAnalyzer>,
    gpt_analyzer: Arc<dyn PartAnalyzer>,
    retriever: Arc<HybridRetriever>,
    graph: Arc<dyn GraphStore>,
    session_timeout: Duration,
    top_n_default: usize,
}

impl LexGraphApi {
    /// Wire the full stack from a configuration and the four injected
    /// process-wide resources (graph store, vector index, embedder, chat
    /// client). Test doubles slot in through the same constructor.
    pub fn build(
        config: &Config,
        graph: Arc<dyn GraphStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatClient>,
        sessions_dir: impl AsRef<Path>,
    ) -> Result<Self, ApiError> {
        let catalog = Arc::new(ChecklistCatalog::builtin().clone());
        let sessions = Arc::new(SessionStore::open(sessions_dir)?);

        let extractor = Arc::new(ConceptExtractor::new(embedder.clone()));
        let lkg = Arc::new(LkgRetriever::new(graph.clone(), extractor.clone()));
        let hippo = Arc::new(HippoRetriever::new(
            embedder.clone(),
            index.clone(),
            graph.clone(),
        ));
        let retriever = Arc::new(
            HybridRetriever::new(lkg, hippo, extractor, graph.clone(), index)
                .with_weights(HybridWeights::from_array(config.hybrid_weights)),
        );

        let governor = Arc::new(RateGovernor::new(Duration::from_secs_f64(
            config.rate_limit_delay,
        )));
        let retry = RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            config.max_retries,
        );
        let settings = AnalyzerSettings {
            llm_model: config.llm_model.clone(),
            retrieve_top_n: config.top_n_default,
            part_timeout: Duration::from_secs(config.part_timeout_s),
            llm_timeout: Duration::from_secs(config.llm_timeout_s),
            ..AnalyzerSettings::default()
        };

        let hybrid_analyzer: Arc<dyn PartAnalyzer> = Arc::new(
            HybridPartAnalyzer::new(
                retriever.clone(),
                chat.clone(),
                governor.clone(),
                settings.clone(),
            )
            .with_retry_policy(retry.clone()),
        );
        let gpt_analyzer: Arc<dyn PartAnalyzer> =
            Arc::new(GptOnlyAnalyzer::new(chat, governor, settings).with_retry_policy(retry));

        let orchestrator = Arc::new(AnalysisOrchestrator::new(catalog.clone(), sessions.clone()));

        Ok(Self {
            catalog,
            registry: Arc::new(SessionRegistry::new()),
            sessions,
            orchestrator,
            hybrid_analyzer,
            gpt_analyzer,
            retriever,
            graph,
            session_timeout: Duration::from_secs(config.session_timeout_s),
            top_n_default: config.top_n_default,
        })
    }

    /// Start an analysis session. Returns immediately with the session id;
    /// the session runs on a spawned task. Must be called inside a tokio
    /// runtime.
    pub fn start_analysis(&self, request: StartAnalysisRequest) -> Result<SessionId, ApiError> {
        if request.contract_id.trim().is_empty() {
            return Err(ApiError::BadInput("contract_id is required".to_string()));
        }
        if request.contract_name.trim().is_empty() {
            return Err(ApiError::BadInput("contract_name is required".to_string()));
        }

        let selected_parts = match request.selected_parts {
            None => self.catalog.part_numbers(),
            Some(parts) => {
                let known = self.catalog.part_numbers();
                for number in &parts {
                    if !known.contains(number) {
                        return Err(ApiError::BadInput(format!(
                            "unknown checklist part {}",
                            number
                        )));
                    }
                }
                let mut parts = parts;
                parts.sort_unstable();
                parts.dedup();
                parts
            }
        };

        let session =
            AnalysisSession::new(request.contract_id, request.contract_name, selected_parts);
        let id = session.id.clone();
        let handle = SessionHandle::new(session);
        self.registry.insert(handle.clone());
        self.sessions.save(&handle.snapshot())?;

        let analyzer = match request.backend {
            AnalyzerBackend::Hybrid => self.hybrid_analyzer.clone(),
            AnalyzerBackend::GptOnly => self.gpt_analyzer.clone(),
        };
        let orchestrator = self.orchestrator.clone();
        let sessions = self.sessions.clone();
        let session_timeout = self.session_timeout;
        let contract_text = request.contract_text;
        let task_handle = handle;

        tokio::spawn(async move {
            let run = orchestrator.run(&task_handle, analyzer, &contract_text);
            if tokio::time::timeout(session_timeout, run).await.is_err() {
                task_handle.cancel.cancel();
                {
                    let mut session = task_handle.session.write().unwrap();
                    session.status = SessionStatus::Failed;
                    session.error = Some("session_timeout".to_string());
                    session.finished_at = Some(Utc::now());
                }
                let snapshot = task_handle.snapshot();
                if let Err(err) = sessions.save(&snapshot) {
                    tracing::warn!(session = %snapshot.id, error = %err, "failed to persist timed-out session");
                }
            }
        });

        Ok(id)
    }

    fn load_session(&self, id: &SessionId) -> Result<AnalysisSession, ApiError> {
        if let Some(handle) = self.registry.get(id) {
            return Ok(handle.snapshot());
        }
        self.sessions
            .load(id)?
            .ok_or_else(|| ApiError::NotFound(format!("analysis {}", id)))
    }

    /// Current status of a session. Always returns a non-null view for a
    /// known session.
    pub fn get_status(&self, id: &SessionId) -> Result<StatusView, ApiError> {
        let session = self.load_session(id)?;
        let message = match session.status {
            SessionStatus::Pending => "analysis queued".to_string(),
            SessionStatus::Running => format!("analysis in progress ({}%)", session.progress),
            SessionStatus::Completed => "analysis complete".to_string(),
            SessionStatus::Failed => session
                .error
                .clone()
                .unwrap_or_else(|| "analysis failed".to_string()),
            SessionStatus::Canceled => "analysis canceled".to_string(),
        };
        Ok(StatusView {
            status: session.status,
            progress: session.progress,
            message,
            completed_parts: session.completed_parts(),
        })
    }

    /// Fetch one part's record. `NotReady` while the session might still
    /// produce it; `NotFound` once it never will.
    pub fn get_part(&self, id: &SessionId, part_number: u8) -> Result<PartRecord, ApiError> {
        let session = self.load_session(id)?;
        if !session.selected_parts.contains(&part_number) {
            return Err(ApiError::NotFound(format!(
                "part {} was not selected for analysis {}",
                part_number, id
            )));
        }
        match session.part_results.get(&part_number) {
            Some(record) => Ok(record.clone()),
            None if session.status.is_terminal() => Err(ApiError::NotFound(format!(
                "part {} was never analyzed in {}",
                part_number, id
            ))),
            None => Err(ApiError::NotReady(format!(
                "part {} is not finished yet",
                part_number
            ))),
        }
    }

    /// The integrated report; available only once the session is terminal.
    /// Idempotent: repeated calls over a terminal session return identical
    /// reports.
    pub fn get_report(&self, id: &SessionId) -> Result<IntegratedReport, ApiError> {
        let session = self.load_session(id)?;
        if !session.status.is_terminal() {
            return Err(ApiError::NotReady(format!(
                "analysis {} is still {:?}",
                id, session.status
            )));
        }
        Ok(IntegratedReport::from_session(&session))
    }

    /// Summaries of all saved sessions, newest first.
    pub fn list_saved(&self) -> Result<Vec<SessionSummary>, ApiError> {
        Ok(self.sessions.list_summaries()?)
    }

    /// Request cooperative cancellation. Idempotent: canceling a terminal
    /// session is a no-op.
    pub fn cancel(&self, id: &SessionId) -> Result<(), ApiError> {
        if let Some(handle) = self.registry.get(id) {
            handle.cancel.cancel();
            return Ok(());
        }
        // Not live: known sessions are a no-op, unknown ones 404
        self.sessions
            .load(id)?
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(format!("analysis {}", id)))
    }

    /// The chat path: one hybrid retrieval over the indexed corpus.
    pub async fn hybrid_retrieve(
        &self,
        query: &str,
        top_n: Option<usize>,
    ) -> Result<HybridResult, ApiError> {
        if query.trim().is_empty() {
            return Err(ApiError::BadInput("query is required".to_string()));
        }
        let top_n = top_n.unwrap_or(self.top_n_default);
        if top_n == 0 {
            return Err(ApiError::BadInput("topN must be positive".to_string()));
        }
        Ok(self.retriever.retrieve(query, top_n).await?)
    }

    /// Operational view of the graph store.
    pub fn graph_stats(&self) -> Result<crate::graph::GraphStats, ApiError> {
        self.graph
            .stats()
            .map_err(|e| ApiError::StoreUnavailable(e.to_string()))
    }

    /// Databases visible to the graph store.
    pub fn list_databases(&self) -> Result<Vec<String>, ApiError> {
        self.graph
            .list_databases()
            .map_err(|e| ApiError::StoreUnavailable(e.to_string()))
    }

    /// The checklist catalog this instance analyzes against.
    pub fn catalog(&self) -> &ChecklistCatalog {
        &self.catalog
    }
}
