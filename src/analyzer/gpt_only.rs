//! GPT-only analyzer
//!
//! Baseline backend that bypasses the retrievers: the whole contract text is
//! chunked to the model's context window with 10 % overlap and each checklist
//! item is judged against every chunk. The worst (highest-risk) chunk verdict
//! wins, so a risky clause buried in a late chunk still surfaces. Used when
//! the graph/vector store is unavailable and as a comparison baseline.

use super::cancel::CancellationToken;
use super::part::{assemble_part_result, AnalyzerSettings, ItemJudge, PartAnalyzer};
use super::types::{fallback_item, ItemResult, PartRecord};
use crate::checklist::ChecklistPart;
use crate::llm::{ChatClient, RateGovernor, RetryPolicy, TokenUsage};
use crate::retrieval::HybridSearchStats;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

/// Overlap between consecutive chunks, as a fraction of the chunk size.
const CHUNK_OVERLAP: f64 = 0.10;

/// Retrieval-free part analyzer.
pub struct GptOnlyAnalyzer {
    judge: ItemJudge,
    /// Char window per chunk; sized to the model's context
    chunk_chars: usize,
}

impl GptOnlyAnalyzer {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        governor: Arc<RateGovernor>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            judge: ItemJudge {
                chat,
                governor,
                retry: RetryPolicy::default(),
                settings,
            },
            chunk_chars: 12_000,
        }
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.judge.retry = retry;
        self
    }

    fn settings(&self) -> &AnalyzerSettings {
        &self.judge.settings
    }
}

/// Split text into char windows with 10 % overlap.
pub(crate) fn chunk_text(text: &str, chunk_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= chunk_chars {
        return vec![text.to_string()];
    }
    let step = ((chunk_chars as f64) * (1.0 - CHUNK_OVERLAP)).max(1.0) as usize;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[async_trait]
impl PartAnalyzer for GptOnlyAnalyzer {
    async fn analyze_part(
        &self,
        part: &ChecklistPart,
        contract_context: &str,
        cancel: &CancellationToken,
    ) -> (PartRecord, TokenUsage) {
        let started = Instant::now();
        let deadline = started + self.settings().part_timeout;
        let mut usage = TokenUsage::default();

        if contract_context.trim().is_empty() {
            return (
                PartRecord::Failed {
                    reason: "no_context".to_string(),
                    partial: assemble_part_result(
                        part,
                        Vec::new(),
                        Vec::new(),
                        HybridSearchStats::default(),
                        started.elapsed(),
                    ),
                },
                usage,
            );
        }

        let chunks = chunk_text(contract_context, self.chunk_chars);
        let mut items: Vec<ItemResult> = Vec::with_capacity(part.deep_dive_checklist.len());

        for item in &part.deep_dive_checklist {
            let mut worst: Option<ItemResult> = None;
            for chunk in &chunks {
                if cancel.is_cancelled() || Instant::now() > deadline {
                    let reason = if cancel.is_cancelled() {
                        "canceled"
                    } else {
                        "timeout"
                    };
                    // Keep the chunk verdicts already folded for this item
                    if let Some(w) = worst.take() {
                        items.push(w);
                    }
                    return (
                        PartRecord::Failed {
                            reason: reason.to_string(),
                            partial: assemble_part_result(
                                part,
                                items,
                                Vec::new(),
                                HybridSearchStats::default(),
                                started.elapsed(),
                            ),
                        },
                        usage,
                    );
                }
                let prompt = format!(
                    "Part under review: {} — {}\n\nChecklist item: {}\n\nContract text (excerpt):\n{}",
                    part.title, part.core_question, item.text, chunk
                );
                let verdict = self.judge.judge(&item.text, prompt, &mut usage).await;
                worst = Some(match worst.take() {
                    Some(current) if current.risk_score >= verdict.risk_score => current,
                    _ => verdict,
                });
            }
            // `worst` is None only if there were no chunks, which non-empty
            // input rules out; keep the item list aligned with the catalog
            items.push(worst.unwrap_or_else(|| fallback_item(&item.text)));
        }

        let result = assemble_part_result(
            part,
            items,
            Vec::new(),
            HybridSearchStats::default(),
            started.elapsed(),
        );
        (PartRecord::Completed { result }, usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::types::{ItemStatus, RiskLevel};
    use crate::checklist::ChecklistItem;
    use crate::llm::ScriptedChatClient;
    use std::time::Duration;

    fn part_with_one_item() -> ChecklistPart {
        ChecklistPart {
            number: 3,
            title: "Payment and Financial Terms".to_string(),
            core_question: "Are payment terms fully specified?".to_string(),
            top_risk_pattern: "Vague triggers".to_string(),
            cross_clause_analysis: vec![],
            deep_dive_checklist: vec![ChecklistItem {
                text: "Is the payment deadline explicit?".to_string(),
            }],
        }
    }

    fn analyzer(chat: ScriptedChatClient) -> GptOnlyAnalyzer {
        GptOnlyAnalyzer::new(
            Arc::new(chat),
            Arc::new(RateGovernor::unlimited()),
            AnalyzerSettings {
                llm_timeout: Duration::from_secs(5),
                ..AnalyzerSettings::default()
            },
        )
        .with_retry_policy(RetryPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
            2,
        ))
    }

    #[test]
    fn chunks_overlap_by_ten_percent() {
        let text = "a".repeat(250);
        let chunks = chunk_text(&text, 100);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].len(), 100);
        // Step is 90 chars, so chunk 2 repeats the last 10 of chunk 1
        assert_eq!(&chunks[0][90..], &chunks[1][..10]);
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("short", 100), vec!["short".to_string()]);
        assert!(chunk_text("", 100).is_empty());
    }

    #[tokio::test]
    async fn single_chunk_contract_gets_one_call_per_item() {
        let chat = ScriptedChatClient::new().with_default(
            r#"{"status":"PASS","risk_score":1,"analysis":"","recommendation":""}"#,
        );
        let chat = Arc::new(chat);
        let analyzer = GptOnlyAnalyzer::new(
            chat.clone(),
            Arc::new(RateGovernor::unlimited()),
            AnalyzerSettings::default(),
        );
        let (record, _) = analyzer
            .analyze_part(&part_with_one_item(), "short contract", &CancellationToken::new())
            .await;
        assert!(record.is_completed());
        assert_eq!(chat.call_count(), 1);
    }

    #[tokio::test]
    async fn worst_chunk_verdict_wins() {
        let chat = ScriptedChatClient::new()
            .with_response(r#"{"status":"PASS","risk_score":0,"analysis":"fine","recommendation":""}"#)
            .with_response(
                r#"{"status":"DANGER","risk_score":5,"analysis":"buried risk","recommendation":"fix"}"#,
            );
        let analyzer = analyzer(chat).with_chunk_chars(100);
        let text = "x".repeat(150); // two chunks
        let (record, _) = analyzer
            .analyze_part(&part_with_one_item(), &text, &CancellationToken::new())
            .await;
        let result = record.result();
        assert_eq!(result.checklist_results[0].risk_score, 5);
        assert_eq!(result.checklist_results[0].status, ItemStatus::Danger);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn empty_contract_fails_no_context() {
        let chat = ScriptedChatClient::new().with_default("{}");
        let analyzer = analyzer(chat);
        let (record, _) = analyzer
            .analyze_part(&part_with_one_item(), "", &CancellationToken::new())
            .await;
        assert_eq!(record.failure_reason(), Some("no_context"));
    }

    #[tokio::test]
    async fn no_relevant_clauses_in_gpt_only_results() {
        let chat = ScriptedChatClient::new().with_default(
            r#"{"status":"PASS","risk_score":0,"analysis":"","recommendation":""}"#,
        );
        let analyzer = analyzer(chat);
        let (record, _) = analyzer
            .analyze_part(&part_with_one_item(), "contract", &CancellationToken::new())
            .await;
        assert!(record.result().relevant_clauses.is_empty());
        assert_eq!(record.result().hybrid_search_stats.total_searches, 0);
    }
}
