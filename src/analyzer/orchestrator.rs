//! Sequential analysis orchestrator
//!
//! Drives one session: parts run strictly one at a time in ascending order,
//! each result is written atomically under the session lock, progress is
//! recomputed, and the snapshot is persisted. Part failures never abort the
//! session; cancellation stops after the part that observed it.

use super::part::PartAnalyzer;
use super::types::{AnalysisSession, PartRecord, SessionStatus};
use crate::checklist::ChecklistCatalog;
use crate::session::{SessionHandle, SessionStore};
use chrono::Utc;
use std::sync::Arc;

/// Runs sessions to completion against a part-analysis backend.
pub struct AnalysisOrchestrator {
    catalog: Arc<ChecklistCatalog>,
    store: Arc<SessionStore>,
}

impl AnalysisOrchestrator {
    pub fn new(catalog: Arc<ChecklistCatalog>, store: Arc<SessionStore>) -> Self {
        Self { catalog, store }
    }

    /// Run the session to a terminal state. The handle's session record is
    /// the single source of truth; this method is its only writer.
    pub async fn run(
        &self,
        handle: &SessionHandle,
        analyzer: Arc<dyn PartAnalyzer>,
        contract_text: &str,
    ) {
        let (session_id, parts) = {
            let mut session = handle.session.write().unwrap();
            session.status = SessionStatus::Running;
            session.started_at = Utc::now();
            let mut parts = session.selected_parts.clone();
            parts.sort_unstable();
            session.selected_parts = parts.clone();
            (session.id.clone(), parts)
        };
        self.persist(handle);

        tracing::info!(session = %session_id, parts = parts.len(), "analysis session started");

        if parts.is_empty() {
            let mut session = handle.session.write().unwrap();
            session.status = SessionStatus::Completed;
            session.progress = 100;
            session.finished_at = Some(Utc::now());
            drop(session);
            self.persist(handle);
            return;
        }

        let total = parts.len();
        let mut processed = 0usize;

        for number in parts {
            if handle.cancel.is_cancelled() {
                self.finish(handle, SessionStatus::Canceled, None);
                return;
            }

            let Some(part) = self.catalog.part(number) else {
                // Selection is validated upstream; an unknown number here is
                // recorded rather than trusted
                self.record_part(
                    handle,
                    number,
                    PartRecord::Failed {
                        reason: "unknown_part".to_string(),
                        partial: empty_partial(number),
                    },
                    &mut processed,
                    total,
                );
                continue;
            };

            let (record, usage) = analyzer
                .analyze_part(part, contract_text, &handle.cancel)
                .await;
            let canceled = record.failure_reason() == Some("canceled");

            {
                let mut session = handle.session.write().unwrap();
                session.token_usage.add(usage);
            }
            self.record_part(handle, number, record, &mut processed, total);

            if canceled {
                self.finish(handle, SessionStatus::Canceled, None);
                return;
            }
        }

        self.finish(handle, SessionStatus::Completed, None);
    }

    /// Write one part record atomically and recompute progress. A part that
    /// was canceled mid-flight does not count as completed.
    fn record_part(
        &self,
        handle: &SessionHandle,
        number: u8,
        record: PartRecord,
        processed: &mut usize,
        total: usize,
    ) {
        let canceled = record.failure_reason() == Some("canceled");
        {
            let mut session = handle.session.write().unwrap();
            session.part_results.insert(number, record);
            if !canceled {
                *processed += 1;
                session.progress = (100 * *processed / total) as u8;
            }
        }
        self.persist(handle);
    }

    fn finish(&self, handle: &SessionHandle, status: SessionStatus, error: Option<String>) {
        {
            let mut session = handle.session.write().unwrap();
            session.status = status;
            session.error = error;
            session.finished_at = Some(Utc::now());
        }
        self.persist(handle);
        let session = handle.session.read().unwrap();
        tracing::info!(
            session = %session.id,
            status = ?session.status,
            progress = session.progress,
            "analysis session finished"
        );
    }

    /// Persist the current snapshot; storage failures degrade to a warning
    /// so a full disk can't kill a running analysis.
    fn persist(&self, handle: &SessionHandle) {
        let snapshot = handle.snapshot();
        if let Err(err) = self.store.save(&snapshot) {
            tracing::warn!(session = %snapshot.id, error = %err, "failed to persist session");
        }
    }
}

fn empty_partial(number: u8) -> super::types::PartResult {
    super::types::PartResult {
        part_number: number,
        part_title: format!("Part {}", number),
        risk_score: 0.0,
        risk_level: super::types::RiskLevel::Low,
        checklist_results: Vec::new(),
        relevant_clauses: Vec::new(),
        recommendations: Vec::new(),
        hybrid_search_stats: crate::retrieval::HybridSearchStats::default(),
        duration_seconds: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::cancel::CancellationToken;
    use crate::analyzer::part::assemble_part_result;
    use crate::analyzer::types::{ItemResult, ItemStatus};
    use crate::checklist::ChecklistPart;
    use crate::llm::TokenUsage;
    use crate::retrieval::HybridSearchStats;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted backend: completes every part with a fixed score, optionally
    /// reporting cancellation from a given part onward.
    struct FixedAnalyzer {
        score: u8,
        cancel_at_part: Option<u8>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FixedAnalyzer {
        fn scoring(score: u8) -> Self {
            Self {
                score,
                cancel_at_part: None,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PartAnalyzer for FixedAnalyzer {
        async fn analyze_part(
            &self,
            part: &ChecklistPart,
            _contract_context: &str,
            cancel: &CancellationToken,
        ) -> (PartRecord, TokenUsage) {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let canceled_here =
                cancel.is_cancelled() || self.cancel_at_part == Some(part.number);
            let items: Vec<ItemResult> = part
                .deep_dive_checklist
                .iter()
                .map(|item| ItemResult {
                    item_text: item.text.clone(),
                    status: ItemStatus::from_score(self.score),
                    risk_score: self.score,
                    analysis: String::new(),
                    recommendation: String::new(),
                })
                .collect();
            let usage = TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            };
            if canceled_here {
                cancel.cancel();
                return (
                    PartRecord::Failed {
                        reason: "canceled".to_string(),
                        partial: assemble_part_result(
                            part,
                            Vec::new(),
                            Vec::new(),
                            HybridSearchStats::default(),
                            Duration::ZERO,
                        ),
                    },
                    usage,
                );
            }
            (
                PartRecord::Completed {
                    result: assemble_part_result(
                        part,
                        items,
                        Vec::new(),
                        HybridSearchStats::default(),
                        Duration::ZERO,
                    ),
                },
                usage,
            )
        }
    }

    fn orchestrator() -> (AnalysisOrchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::open(dir.path()).unwrap());
        let catalog = Arc::new(ChecklistCatalog::builtin().clone());
        (AnalysisOrchestrator::new(catalog, store), dir)
    }

    #[tokio::test]
    async fn empty_selection_completes_immediately() {
        let (orchestrator, _dir) = orchestrator();
        let handle = SessionHandle::new(AnalysisSession::new("c1", "Contract", vec![]));
        orchestrator
            .run(&handle, Arc::new(FixedAnalyzer::scoring(0)), "text")
            .await;
        let session = handle.snapshot();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.progress, 100);
        assert!(session.part_results.is_empty());
        assert!(session.finished_at.is_some());
    }

    #[tokio::test]
    async fn parts_run_in_ascending_order_with_progress() {
        let (orchestrator, _dir) = orchestrator();
        let handle = SessionHandle::new(AnalysisSession::new("c1", "Contract", vec![3, 1, 2]));
        orchestrator
            .run(&handle, Arc::new(FixedAnalyzer::scoring(1)), "text")
            .await;
        let session = handle.snapshot();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.progress, 100);
        let recorded: Vec<u8> = session.part_results.keys().copied().collect();
        assert_eq!(recorded, vec![1, 2, 3]);
        // Token usage accumulated across the three parts
        assert_eq!(session.token_usage.prompt_tokens, 30);
    }

    #[tokio::test]
    async fn cancel_during_part_three_stops_the_session() {
        let (orchestrator, _dir) = orchestrator();
        let handle = SessionHandle::new(AnalysisSession::new(
            "c1",
            "Contract",
            (1..=10).collect(),
        ));
        let analyzer = Arc::new(FixedAnalyzer {
            score: 1,
            cancel_at_part: Some(3),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        orchestrator.run(&handle, analyzer.clone(), "text").await;

        let session = handle.snapshot();
        assert_eq!(session.status, SessionStatus::Canceled);
        assert!(session.part_results[&1].is_completed());
        assert!(session.part_results[&2].is_completed());
        assert_eq!(session.part_results[&3].failure_reason(), Some("canceled"));
        // Parts 4..=10 were never started
        assert!(!session.part_results.contains_key(&4));
        assert_eq!(analyzer.calls.load(Ordering::Relaxed), 3);
        // Two of ten parts completed
        assert_eq!(session.progress, 20);
    }

    #[tokio::test]
    async fn progress_is_monotone_and_bounded() {
        let (orchestrator, _dir) = orchestrator();
        let handle = SessionHandle::new(AnalysisSession::new("c1", "Contract", vec![1, 2, 3, 4]));
        let watcher_handle = handle.clone();
        let watcher = tokio::spawn(async move {
            let mut last = 0u8;
            for _ in 0..200 {
                let snapshot = watcher_handle.snapshot();
                assert!(snapshot.progress >= last, "progress went backwards");
                assert!(snapshot.progress <= 100);
                last = snapshot.progress;
                if snapshot.status.is_terminal() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });
        let analyzer = Arc::new(FixedAnalyzer {
            score: 2,
            cancel_at_part: None,
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(5),
        });
        orchestrator.run(&handle, analyzer, "text").await;
        watcher.await.unwrap();
        assert_eq!(handle.snapshot().progress, 100);
    }

    #[tokio::test]
    async fn sessions_persist_after_each_part() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::open(dir.path()).unwrap());
        let catalog = Arc::new(ChecklistCatalog::builtin().clone());
        let orchestrator = AnalysisOrchestrator::new(catalog, store.clone());

        let handle = SessionHandle::new(AnalysisSession::new("c1", "Contract", vec![1]));
        let id = handle.snapshot().id;
        orchestrator
            .run(&handle, Arc::new(FixedAnalyzer::scoring(0)), "text")
            .await;

        let persisted = store.load(&id).unwrap().unwrap();
        assert_eq!(persisted.status, SessionStatus::Completed);
        assert_eq!(persisted.part_results.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_sessions_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::open(dir.path()).unwrap());
        let catalog = Arc::new(ChecklistCatalog::builtin().clone());
        let orchestrator = Arc::new(AnalysisOrchestrator::new(catalog, store));

        let h1 = SessionHandle::new(AnalysisSession::new("c1", "Contract 1", vec![1, 2]));
        let h2 = SessionHandle::new(AnalysisSession::new("c2", "Contract 2", vec![1, 2]));

        let o1 = orchestrator.clone();
        let a1 = Arc::new(FixedAnalyzer::scoring(5));
        let h1_clone = h1.clone();
        let t1 = tokio::spawn(async move { o1.run(&h1_clone, a1, "text one").await });

        let o2 = orchestrator.clone();
        let a2 = Arc::new(FixedAnalyzer::scoring(0));
        let h2_clone = h2.clone();
        let t2 = tokio::spawn(async move { o2.run(&h2_clone, a2, "text two").await });

        t1.await.unwrap();
        t2.await.unwrap();

        let s1 = h1.snapshot();
        let s2 = h2.snapshot();
        assert_eq!(s1.status, SessionStatus::Completed);
        assert_eq!(s2.status, SessionStatus::Completed);
        assert_eq!(s1.part_results[&1].result().risk_score, 5.0);
        assert_eq!(s2.part_results[&1].result().risk_score, 0.0);
    }
}
