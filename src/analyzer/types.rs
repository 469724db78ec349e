//! Typed results for the risk analysis pipeline
//!
//! Item, part, and session results are tagged structs end to end; JSON is
//! only the wire shape. Risk bands and the part-score aggregation rule live
//! here so every producer agrees on them.

use crate::llm::TokenUsage;
use crate::retrieval::HybridSearchStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Verdict for a single checklist item. Consistent with the score bands:
/// PASS 0–1, WARN 2–3, DANGER 4–5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    Pass,
    Warn,
    Danger,
}

impl ItemStatus {
    /// The status band implied by an item risk score.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=1 => ItemStatus::Pass,
            2..=3 => ItemStatus::Warn,
            _ => ItemStatus::Danger,
        }
    }

    pub fn matches_score(self, score: u8) -> bool {
        Self::from_score(score) == self
    }
}

/// Risk level of a part or the whole report.
/// Bands: `[0,1)` LOW, `[1,2.5)` MEDIUM, `[2.5,4)` HIGH, `[4,5]` CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f32) -> Self {
        if score < 1.0 {
            RiskLevel::Low
        } else if score < 2.5 {
            RiskLevel::Medium
        } else if score < 4.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// The structured verdict for one checklist item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_text: String,
    pub status: ItemStatus,
    pub risk_score: u8,
    pub analysis: String,
    pub recommendation: String,
}

/// The parse-error fallback verdict: produced when the model response never
/// becomes valid JSON, or when the call fails permanently.
pub fn fallback_item(item_text: impl Into<String>) -> ItemResult {
    ItemResult {
        item_text: item_text.into(),
        status: ItemStatus::Warn,
        risk_score: 2,
        analysis: "parse_error".to_string(),
        recommendation: String::new(),
    }
}

/// Aggregated outcome of analyzing one checklist part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartResult {
    pub part_number: u8,
    pub part_title: String,
    /// Mean of item risk scores, rounded to one decimal
    pub risk_score: f32,
    pub risk_level: RiskLevel,
    pub checklist_results: Vec<ItemResult>,
    pub relevant_clauses: Vec<String>,
    pub recommendations: Vec<String>,
    pub hybrid_search_stats: HybridSearchStats,
    pub duration_seconds: f64,
}

/// A part result as recorded in the session: completed, or failed with the
/// partial result (items finished before the failure) retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartRecord {
    Completed { result: PartResult },
    Failed { reason: String, partial: PartResult },
}

impl PartRecord {
    pub fn result(&self) -> &PartResult {
        match self {
            PartRecord::Completed { result } => result,
            PartRecord::Failed { partial, .. } => partial,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PartRecord::Completed { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            PartRecord::Completed { .. } => None,
            PartRecord::Failed { reason, .. } => Some(reason),
        }
    }
}

/// Round half away from zero to one decimal.
pub fn round_to_tenth(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

/// Part score: arithmetic mean of item scores, one decimal. Empty item
/// lists score 0.0.
pub fn mean_item_score(items: &[ItemResult]) -> f32 {
    if items.is_empty() {
        return 0.0;
    }
    let sum: f32 = items.iter().map(|i| i.risk_score as f32).sum();
    round_to_tenth(sum / items.len() as f32)
}

/// Unique identifier for an analysis session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle: `Pending → Running → Completed | Failed | Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Canceled
        )
    }
}

/// A stateful, cancelable run of the checklist over one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub id: SessionId,
    pub contract_id: String,
    pub contract_name: String,
    pub status: SessionStatus,
    /// `100 * completed_parts / selected_parts.len()`; canceled parts
    /// don't count as completed
    pub progress: u8,
    pub selected_parts: Vec<u8>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub part_results: BTreeMap<u8, PartRecord>,
    pub error: Option<String>,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl AnalysisSession {
    pub fn new(
        contract_id: impl Into<String>,
        contract_name: impl Into<String>,
        selected_parts: Vec<u8>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            contract_id: contract_id.into(),
            contract_name: contract_name.into(),
            status: SessionStatus::Pending,
            progress: 0,
            selected_parts,
            started_at: Utc::now(),
            finished_at: None,
            part_results: BTreeMap::new(),
            error: None,
            token_usage: TokenUsage::default(),
        }
    }

    /// Parts with a completed (non-failed) record, ascending.
    pub fn completed_parts(&self) -> Vec<u8> {
        self.part_results
            .iter()
            .filter(|(_, record)| record.is_completed())
            .map(|(number, _)| *number)
            .collect()
    }
}

/// The cheap listing view — everything `list_saved` needs without reading
/// part-result bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub contract_id: String,
    pub contract_name: String,
    pub status: SessionStatus,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&AnalysisSession> for SessionSummary {
    fn from(session: &AnalysisSession) -> Self {
        Self {
            id: session.id.clone(),
            contract_id: session.contract_id.clone(),
            contract_name: session.contract_name.clone(),
            status: session.status,
            progress: session.progress,
            started_at: session.started_at,
            finished_at: session.finished_at,
        }
    }
}

/// Rollup counters for the integrated report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Parts with any recorded result (completed or failed)
    pub total_parts_analyzed: usize,
    /// Completed parts at HIGH or CRITICAL level
    pub high_risk_parts: usize,
    /// Checklist items at DANGER across completed parts
    pub critical_issues: usize,
}

/// The final report over a terminal session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratedReport {
    /// Mean of completed parts' scores, one decimal; `null` when the
    /// session selected parts but none completed
    pub overall_risk_score: Option<f32>,
    pub overall_risk_level: RiskLevel,
    pub part_results: BTreeMap<u8, PartRecord>,
    pub summary: ReportSummary,
}

impl IntegratedReport {
    /// Build the report from a session snapshot. Deterministic: identical
    /// sessions produce byte-identical reports.
    pub fn from_session(session: &AnalysisSession) -> Self {
        let completed: Vec<&PartResult> = session
            .part_results
            .values()
            .filter(|r| r.is_completed())
            .map(|r| r.result())
            .collect();

        let overall_risk_score = if session.selected_parts.is_empty() {
            Some(0.0)
        } else if completed.is_empty() {
            None
        } else {
            let sum: f32 = completed.iter().map(|p| p.risk_score).sum();
            Some(round_to_tenth(sum / completed.len() as f32))
        };

        let overall_risk_level = RiskLevel::from_score(overall_risk_score.unwrap_or(0.0));

        let summary = ReportSummary {
            total_parts_analyzed: session.part_results.len(),
            high_risk_parts: completed
                .iter()
                .filter(|p| matches!(p.risk_level, RiskLevel::High | RiskLevel::Critical))
                .count(),
            critical_issues: completed
                .iter()
                .flat_map(|p| p.checklist_results.iter())
                .filter(|i| i.status == ItemStatus::Danger)
                .count(),
        };

        Self {
            overall_risk_score,
            overall_risk_level,
            part_results: session.part_results.clone(),
            summary,
        }
    }
}
