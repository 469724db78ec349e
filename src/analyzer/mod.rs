//! Part-by-part contract risk analysis
//!
//! Typed result model, the two part-analysis backends (hybrid retrieval and
//! GPT-only), and the sequential orchestrator that runs a session.

mod cancel;
mod gpt_only;
mod orchestrator;
pub(crate) mod part;
mod types;

pub use cancel::CancellationToken;
pub use gpt_only::GptOnlyAnalyzer;
pub use orchestrator::AnalysisOrchestrator;
pub use part::{AnalyzerSettings, HybridPartAnalyzer, PartAnalyzer};
pub use types::{
    fallback_item, mean_item_score, round_to_tenth, AnalysisSession, IntegratedReport, ItemResult,
    ItemStatus, PartRecord, PartResult, ReportSummary, RiskLevel, SessionId, SessionStatus,
    SessionSummary,
};
