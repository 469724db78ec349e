//! End-to-end analysis scenarios over the in-memory corpus with scripted
//! LLM responses.

mod common;

use common::*;
use lexgraph::{
    AnalyzerBackend, ChecklistCatalog, ItemStatus, RiskLevel, ScriptedChatClient, SessionStatus,
    StartAnalysisRequest,
};

fn start_request(parts: Vec<u8>, text: &str) -> StartAnalysisRequest {
    StartAnalysisRequest {
        contract_id: "contract-1".to_string(),
        contract_name: "Test Contract".to_string(),
        contract_text: text.to_string(),
        selected_parts: Some(parts),
        backend: AnalyzerBackend::Hybrid,
    }
}

#[tokio::test]
async fn single_part_session_grounds_clauses_in_the_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChatClient::new().with_default(PASS_JSON);
    let api = api_over_corpus(chat, dir.path()).await;

    let id = api
        .start_analysis(start_request(vec![1], "단순 테스트 계약"))
        .unwrap();
    let status = wait_terminal(&api, &id).await;
    assert_eq!(status.status, SessionStatus::Completed);
    assert_eq!(status.progress, 100);
    assert_eq!(status.completed_parts, vec![1]);

    let record = api.get_part(&id, 1).unwrap();
    assert!(record.is_completed());
    let result = record.result();

    let expected_items = ChecklistCatalog::builtin()
        .part(1)
        .unwrap()
        .deep_dive_checklist
        .len();
    assert_eq!(result.checklist_results.len(), expected_items);

    // Every relevant clause is the text of an indexed passage
    for clause in &result.relevant_clauses {
        assert!(
            [P1, P2, P3].contains(&clause.as_str()),
            "clause not from the corpus: {}",
            clause
        );
    }
}

#[tokio::test]
async fn danger_everywhere_is_critical_with_bounded_recommendations() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChatClient::new().with_default(DANGER_JSON);
    let api = api_over_corpus(chat, dir.path()).await;

    let id = api
        .start_analysis(start_request(vec![1], "contract text"))
        .unwrap();
    wait_terminal(&api, &id).await;

    let result = api.get_part(&id, 1).unwrap().result().clone();
    assert_eq!(result.risk_score, 5.0);
    assert_eq!(result.risk_level, RiskLevel::Critical);
    assert!(result.recommendations.len() <= 5);
    let mut unique = result.recommendations.clone();
    unique.dedup();
    assert_eq!(unique.len(), result.recommendations.len());
}

#[tokio::test]
async fn non_json_responses_degrade_every_item_to_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChatClient::new().with_default("certainly! here is my analysis…");
    let api = api_over_corpus(chat, dir.path()).await;

    let id = api
        .start_analysis(start_request(vec![1], "contract text"))
        .unwrap();
    wait_terminal(&api, &id).await;

    let result = api.get_part(&id, 1).unwrap().result().clone();
    assert_eq!(result.risk_score, 2.0);
    assert_eq!(result.risk_level, RiskLevel::Medium);
    for item in &result.checklist_results {
        assert_eq!(item.status, ItemStatus::Warn);
        assert_eq!(item.risk_score, 2);
        assert_eq!(item.analysis, "parse_error");
    }
}

#[tokio::test]
async fn broken_vector_index_still_completes_the_part() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChatClient::new().with_default(PASS_JSON);
    let api = api_with_broken_index(chat, dir.path()).await;

    let id = api
        .start_analysis(start_request(vec![1], "contract text"))
        .unwrap();
    let status = wait_terminal(&api, &id).await;
    assert_eq!(status.status, SessionStatus::Completed);

    let record = api.get_part(&id, 1).unwrap();
    assert!(record.is_completed());
    assert!(record.result().hybrid_search_stats.successful_searches >= 1);
}

#[tokio::test]
async fn empty_selection_completes_with_empty_low_report() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChatClient::new().with_default(PASS_JSON);
    let api = api_over_corpus(chat, dir.path()).await;

    let id = api
        .start_analysis(start_request(vec![], "contract text"))
        .unwrap();
    let status = wait_terminal(&api, &id).await;
    assert_eq!(status.status, SessionStatus::Completed);

    let report = api.get_report(&id).unwrap();
    assert_eq!(report.overall_risk_score, Some(0.0));
    assert_eq!(report.overall_risk_level, RiskLevel::Low);
    assert!(report.part_results.is_empty());
}

#[tokio::test]
async fn empty_contract_text_fails_every_part_with_null_overall() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChatClient::new().with_default(PASS_JSON);
    let api = api_over_corpus(chat, dir.path()).await;

    let id = api.start_analysis(start_request(vec![1, 2], "")).unwrap();
    let status = wait_terminal(&api, &id).await;
    assert_eq!(status.status, SessionStatus::Completed);

    let report = api.get_report(&id).unwrap();
    assert_eq!(report.overall_risk_score, None);
    for record in report.part_results.values() {
        assert_eq!(record.failure_reason(), Some("no_context"));
    }
}

#[tokio::test]
async fn permanently_failing_llm_yields_warn_parts() {
    let dir = tempfile::tempdir().unwrap();
    // Queue is empty and no default: every chat call fails permanently
    let chat = ScriptedChatClient::new();
    let api = api_over_corpus(chat, dir.path()).await;

    let id = api
        .start_analysis(start_request(vec![1], "contract text"))
        .unwrap();
    wait_terminal(&api, &id).await;

    let result = api.get_part(&id, 1).unwrap().result().clone();
    assert_eq!(result.risk_score, 2.0);
    assert_eq!(result.risk_level, RiskLevel::Medium);

    let report = api.get_report(&id).unwrap();
    assert_eq!(report.overall_risk_score, Some(2.0));
    assert_eq!(report.overall_risk_level, RiskLevel::Medium);
}

#[tokio::test]
async fn reports_are_idempotent_and_sessions_independent() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChatClient::new().with_default(PASS_JSON);
    let api = api_over_corpus(chat, dir.path()).await;

    let id_a = api
        .start_analysis(start_request(vec![1], "contract text"))
        .unwrap();
    let id_b = api
        .start_analysis(start_request(vec![1], "contract text"))
        .unwrap();
    assert_ne!(id_a, id_b, "same input yields distinct sessions");

    wait_terminal(&api, &id_a).await;
    wait_terminal(&api, &id_b).await;

    let first = serde_json::to_vec(&api.get_report(&id_a).unwrap()).unwrap();
    let second = serde_json::to_vec(&api.get_report(&id_a).unwrap()).unwrap();
    assert_eq!(first, second, "report is byte-stable across calls");
}

#[tokio::test]
async fn concurrent_sessions_match_a_single_session_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChatClient::new().with_default(DANGER_JSON);
    let api = api_over_corpus(chat, dir.path()).await;

    // Baseline: one session alone
    let baseline_id = api
        .start_analysis(start_request(vec![1, 2], "contract text"))
        .unwrap();
    wait_terminal(&api, &baseline_id).await;
    let baseline = api.get_report(&baseline_id).unwrap();

    // Two sessions racing over the same corpus
    let id_a = api
        .start_analysis(start_request(vec![1, 2], "contract text"))
        .unwrap();
    let id_b = api
        .start_analysis(start_request(vec![1, 2], "contract text"))
        .unwrap();
    wait_terminal(&api, &id_a).await;
    wait_terminal(&api, &id_b).await;

    for id in [&id_a, &id_b] {
        let report = api.get_report(id).unwrap();
        assert_eq!(report.overall_risk_score, baseline.overall_risk_score);
        for (number, record) in &report.part_results {
            let baseline_record = &baseline.part_results[number];
            assert_eq!(
                record.result().risk_score,
                baseline_record.result().risk_score
            );
            assert_eq!(
                record.result().relevant_clauses,
                baseline_record.result().relevant_clauses
            );
        }
    }
}

#[tokio::test]
async fn gpt_only_backend_completes_without_a_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let chat = ScriptedChatClient::new().with_default(PASS_JSON);
    let api = api_over_corpus(chat, dir.path()).await;

    let id = api
        .start_analysis(StartAnalysisRequest {
            contract_id: "contract-1".to_string(),
            contract_name: "Test Contract".to_string(),
            contract_text: "Payment is due in thirty days.".to_string(),
            selected_parts: Some(vec![3]),
            backend: AnalyzerBackend::GptOnly,
        })
        .unwrap();
    let status = wait_terminal(&api, &id).await;
    assert_eq!(status.status, SessionStatus::Completed);

    let result = api.get_part(&id, 3).unwrap().result().clone();
    assert!(result.relevant_clauses.is_empty());
    assert_eq!(
        result.checklist_results.len(),
        ChecklistCatalog::builtin()
            .part(3)
            .unwrap()
            .deep_dive_checklist
            .len()
    );
}
