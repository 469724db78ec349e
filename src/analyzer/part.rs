//! Part risk analyzer
//!
//! Runs one checklist part: three hybrid retrievals seed the relevant
//! clauses, then each deep-dive item gets a single JSON-mode LLM verdict.
//! State machine per part: START → RETRIEVE → PER_ITEM(×n) → AGGREGATE →
//! DONE, with failed parts keeping the items completed so far.

use super::cancel::CancellationToken;
use super::types::{
    fallback_item, mean_item_score, ItemResult, ItemStatus, PartRecord, PartResult, RiskLevel,
};
use crate::checklist::ChecklistPart;
use crate::llm::{ChatClient, ChatRequest, LlmError, RateGovernor, RetryPolicy, TokenUsage};
use crate::retrieval::{HybridRetriever, HybridSearchStats, ScoredPassage};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Fixed system prompt for item verdicts.
pub(crate) const SYSTEM_PROMPT: &str = "You are a contract-risk analyst. \
Evaluate the checklist question strictly against the provided contract clauses. \
Respond with a single JSON object and nothing else: \
{\"status\": \"PASS\" | \"WARN\" | \"DANGER\", \"risk_score\": <integer 0-5>, \
\"analysis\": \"<at most 500 characters>\", \"recommendation\": \"<at most 500 characters>\"}. \
PASS means score 0-1, WARN means 2-3, DANGER means 4-5. \
If the clauses don't address the question, say so in the analysis and score the exposure.";

/// Tunables shared by the hybrid and GPT-only analyzers.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub llm_model: String,
    /// topN per retrieval query
    pub retrieve_top_n: usize,
    /// Relevant clauses kept after merging the three query results
    pub clause_limit: usize,
    /// Char budget for the clause context handed to the model
    pub context_char_budget: usize,
    pub part_timeout: Duration,
    pub llm_timeout: Duration,
    /// Char cap on analysis/recommendation fields
    pub item_field_limit: usize,
}

/// Recommendations kept per part after prefix deduplication.
pub(crate) const MAX_RECOMMENDATIONS: usize = 5;

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            llm_model: "gpt-4o-mini".to_string(),
            retrieve_top_n: 15,
            clause_limit: 30,
            context_char_budget: 8192,
            part_timeout: Duration::from_secs(300),
            llm_timeout: Duration::from_secs(60),
            item_field_limit: 500,
        }
    }
}

/// A part-analysis backend. The orchestrator drives whichever backend the
/// caller selected; both return a record plus the token usage they spent.
#[async_trait]
pub trait PartAnalyzer: Send + Sync {
    async fn analyze_part(
        &self,
        part: &ChecklistPart,
        contract_context: &str,
        cancel: &CancellationToken,
    ) -> (PartRecord, TokenUsage);
}

// ---------------------------------------------------------------------------
// Item judging shared by both backends
// ---------------------------------------------------------------------------

/// Raw wire shape of an item verdict.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    status: String,
    risk_score: f64,
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    recommendation: String,
}

/// A model response that never became valid JSON.
#[derive(Debug)]
pub(crate) struct ParseFailure {
    pub message: String,
}

/// Pull the JSON object out of a response that may carry code fences or
/// surrounding prose.
fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end >= start).then(|| &content[start..=end])
}

fn parse_item_verdict(content: &str) -> Result<RawVerdict, ParseFailure> {
    let json = extract_json(content).ok_or_else(|| ParseFailure {
        message: "no JSON object in response".to_string(),
    })?;
    serde_json::from_str(json).map_err(|e| ParseFailure {
        message: e.to_string(),
    })
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Turn a parsed verdict into a typed item result: clamp the score, cap the
/// free-text fields, and force the status into the band the score implies.
fn verdict_to_item(verdict: RawVerdict, item_text: &str, field_limit: usize) -> ItemResult {
    let risk_score = verdict.risk_score.clamp(0.0, 5.0).round() as u8;
    let claimed = match verdict.status.trim().to_uppercase().as_str() {
        "PASS" => Some(ItemStatus::Pass),
        "WARN" => Some(ItemStatus::Warn),
        "DANGER" => Some(ItemStatus::Danger),
        _ => None,
    };
    let status = match claimed {
        Some(s) if s.matches_score(risk_score) => s,
        _ => ItemStatus::from_score(risk_score),
    };
    ItemResult {
        item_text: item_text.to_string(),
        status,
        risk_score,
        analysis: truncate_chars(&verdict.analysis, field_limit),
        recommendation: truncate_chars(&verdict.recommendation, field_limit),
    }
}

/// One JSON-mode chat call with governor spacing, timeout, and retry; a
/// single repair attempt on unparseable output; the fallback verdict when
/// everything else is exhausted.
pub(crate) struct ItemJudge {
    pub chat: Arc<dyn ChatClient>,
    pub governor: Arc<RateGovernor>,
    pub retry: RetryPolicy,
    pub settings: AnalyzerSettings,
}

impl ItemJudge {
    async fn call(&self, request: &ChatRequest, usage: &mut TokenUsage) -> Result<String, LlmError> {
        let response = self
            .retry
            .run(|| async {
                match tokio::time::timeout(self.settings.llm_timeout, self.chat.chat(request)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout(self.settings.llm_timeout.as_secs())),
                }
            })
            .await?;
        usage.add(response.usage);
        Ok(response.content)
    }

    pub(crate) async fn judge(
        &self,
        item_text: &str,
        user_prompt: String,
        usage: &mut TokenUsage,
    ) -> ItemResult {
        self.governor.acquire().await;

        let request = ChatRequest::new(&self.settings.llm_model)
            .with_system(SYSTEM_PROMPT)
            .with_user(user_prompt)
            .with_json_mode();

        let content = match self.call(&request, usage).await {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(error = %err, "item verdict call failed, using fallback");
                return fallback_item(item_text);
            }
        };

        match parse_item_verdict(&content) {
            Ok(verdict) => verdict_to_item(verdict, item_text, self.settings.item_field_limit),
            Err(failure) => {
                tracing::warn!(error = %failure.message, "unparseable verdict, attempting repair");
                self.repair(item_text, &content, usage).await
            }
        }
    }

    /// Single-shot "repair to JSON" pass; gives up to the fallback after it.
    async fn repair(&self, item_text: &str, broken: &str, usage: &mut TokenUsage) -> ItemResult {
        self.governor.acquire().await;
        let prompt = format!(
            "The following text was supposed to be a single JSON object with the fields \
             status, risk_score, analysis, recommendation. Rewrite it as exactly that JSON \
             object, with no other text:\n\n{}",
            broken
        );
        let request = ChatRequest::new(&self.settings.llm_model)
            .with_system(SYSTEM_PROMPT)
            .with_user(prompt)
            .with_json_mode();

        let repaired = match tokio::time::timeout(self.settings.llm_timeout, self.chat.chat(&request))
            .await
        {
            Ok(Ok(response)) => {
                usage.add(response.usage);
                response.content
            }
            _ => return fallback_item(item_text),
        };
        match parse_item_verdict(&repaired) {
            Ok(verdict) => verdict_to_item(verdict, item_text, self.settings.item_field_limit),
            Err(_) => fallback_item(item_text),
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Assemble a part result from finished items. Also used for partial results
/// on failure, where `items` holds whatever completed.
pub(crate) fn assemble_part_result(
    part: &ChecklistPart,
    items: Vec<ItemResult>,
    relevant_clauses: Vec<String>,
    stats: HybridSearchStats,
    duration: Duration,
) -> PartResult {
    let risk_score = mean_item_score(&items);
    let recommendations = top_recommendations(&items, MAX_RECOMMENDATIONS);
    PartResult {
        part_number: part.number,
        part_title: part.title.clone(),
        risk_score,
        risk_level: RiskLevel::from_score(risk_score),
        checklist_results: items,
        relevant_clauses,
        recommendations,
        hybrid_search_stats: stats,
        duration_seconds: duration.as_secs_f64(),
    }
}

/// The ≤ `max` highest-scoring non-empty recommendations, deduplicated by
/// prefix (a recommendation subsumed by an already-kept one is dropped).
pub(crate) fn top_recommendations(items: &[ItemResult], max: usize) -> Vec<String> {
    let mut candidates: Vec<(&ItemResult, String)> = items
        .iter()
        .filter(|i| !i.recommendation.trim().is_empty())
        .map(|i| (i, i.recommendation.trim().to_string()))
        .collect();
    candidates.sort_by(|a, b| {
        b.0.risk_score
            .cmp(&a.0.risk_score)
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut kept: Vec<String> = Vec::new();
    for (_, candidate) in candidates {
        let lower = candidate.to_lowercase();
        let duplicate = kept.iter().any(|k| {
            let k_lower = k.to_lowercase();
            k_lower.starts_with(&lower) || lower.starts_with(&k_lower)
        });
        if !duplicate {
            kept.push(candidate);
        }
        if kept.len() == max {
            break;
        }
    }
    kept
}

/// The three search queries derived from a checklist part.
pub(crate) fn build_queries(part: &ChecklistPart) -> Vec<String> {
    let mut queries = vec![part.core_question.clone(), part.top_risk_pattern.clone()];
    let cross = part.cross_clause_analysis.join(" ");
    if !cross.trim().is_empty() {
        queries.push(cross);
    }
    queries
}

/// Join clause texts into the model context, respecting the char budget.
pub(crate) fn build_context_block(clauses: &[ScoredPassage], char_budget: usize) -> String {
    let mut block = String::new();
    for (i, clause) in clauses.iter().enumerate() {
        let entry = format!("[{}] {}\n\n", i + 1, clause.passage.text);
        if block.chars().count() + entry.chars().count() > char_budget {
            if block.is_empty() {
                // Nothing fits whole — truncate the first clause
                block = truncate_chars(&entry, char_budget);
            }
            break;
        }
        block.push_str(&entry);
    }
    block
}

// ---------------------------------------------------------------------------
// Hybrid backend
// ---------------------------------------------------------------------------

/// The retrieval-grounded analyzer: hybrid search supplies the clauses the
/// model judges each item against.
pub struct HybridPartAnalyzer {
    retriever: Arc<HybridRetriever>,
    judge: ItemJudge,
}

impl HybridPartAnalyzer {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        chat: Arc<dyn ChatClient>,
        governor: Arc<RateGovernor>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            retriever,
            judge: ItemJudge {
                chat,
                governor,
                retry: RetryPolicy::default(),
                settings,
            },
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.judge.retry = retry;
        self
    }

    fn settings(&self) -> &AnalyzerSettings {
        &self.judge.settings
    }

    fn failed(
        &self,
        part: &ChecklistPart,
        reason: &str,
        items: Vec<ItemResult>,
        relevant_clauses: Vec<String>,
        stats: HybridSearchStats,
        started: Instant,
    ) -> PartRecord {
        PartRecord::Failed {
            reason: reason.to_string(),
            partial: assemble_part_result(
                part,
                items,
                relevant_clauses,
                stats,
                started.elapsed(),
            ),
        }
    }
}

#[async_trait]
impl PartAnalyzer for HybridPartAnalyzer {
    async fn analyze_part(
        &self,
        part: &ChecklistPart,
        contract_context: &str,
        cancel: &CancellationToken,
    ) -> (PartRecord, TokenUsage) {
        let started = Instant::now();
        let deadline = started + self.settings().part_timeout;
        let mut usage = TokenUsage::default();
        let mut stats = HybridSearchStats::default();

        if contract_context.trim().is_empty() {
            return (
                self.failed(part, "no_context", Vec::new(), Vec::new(), stats, started),
                usage,
            );
        }

        // RETRIEVE: three queries, unioned and deduplicated by passage id
        let mut merged: HashMap<String, ScoredPassage> = HashMap::new();
        let mut any_retrieval_ok = false;
        for query in build_queries(part) {
            if cancel.is_cancelled() {
                return (
                    self.failed(part, "canceled", Vec::new(), Vec::new(), stats, started),
                    usage,
                );
            }
            if Instant::now() > deadline {
                return (
                    self.failed(part, "timeout", Vec::new(), Vec::new(), stats, started),
                    usage,
                );
            }
            match self
                .retriever
                .retrieve(&query, self.settings().retrieve_top_n)
                .await
            {
                Ok(result) => {
                    any_retrieval_ok = true;
                    stats.merge(&result.stats);
                    for hit in result.passages {
                        merged
                            .entry(hit.passage.id.as_str().to_string())
                            .and_modify(|existing| {
                                existing.score = existing.score.max(hit.score)
                            })
                            .or_insert(hit);
                    }
                }
                Err(err) => {
                    tracing::warn!(part = part.number, error = %err, "retrieval query failed");
                }
            }
        }
        if !any_retrieval_ok {
            return (
                self.failed(
                    part,
                    "retrieval_unavailable",
                    Vec::new(),
                    Vec::new(),
                    stats,
                    started,
                ),
                usage,
            );
        }

        let mut clauses: Vec<ScoredPassage> = merged.into_values().collect();
        clauses.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.passage.id.cmp(&b.passage.id))
        });
        clauses.truncate(self.settings().clause_limit);
        let relevant_clauses: Vec<String> =
            clauses.iter().map(|c| c.passage.text.clone()).collect();
        let context_block = build_context_block(&clauses, self.settings().context_char_budget);

        // PER_ITEM: sequential, rate-limited
        let mut items: Vec<ItemResult> = Vec::with_capacity(part.deep_dive_checklist.len());
        for item in &part.deep_dive_checklist {
            if cancel.is_cancelled() {
                return (
                    self.failed(part, "canceled", items, relevant_clauses, stats, started),
                    usage,
                );
            }
            if Instant::now() > deadline {
                return (
                    self.failed(part, "timeout", items, relevant_clauses, stats, started),
                    usage,
                );
            }
            let prompt = format!(
                "Checklist item: {}\n\nRelevant contract clauses:\n{}",
                item.text, context_block
            );
            let result = self.judge.judge(&item.text, prompt, &mut usage).await;
            items.push(result);
        }

        // AGGREGATE
        let result =
            assemble_part_result(part, items, relevant_clauses, stats, started.elapsed());
        tracing::info!(
            part = part.number,
            score = result.risk_score,
            "part analysis complete"
        );
        (PartRecord::Completed { result }, usage)
    }
}
