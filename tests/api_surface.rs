//! API surface behavior: input validation, error taxonomy, the chat
//! retrieval path, and saved-session listing.

mod common;

use common::*;
use lexgraph::{
    AnalyzerBackend, ApiError, ScriptedChatClient, SessionId, SessionStatus, StartAnalysisRequest,
};

fn request(parts: Option<Vec<u8>>) -> StartAnalysisRequest {
    StartAnalysisRequest {
        contract_id: "contract-1".to_string(),
        contract_name: "Test Contract".to_string(),
        contract_text: "Payment is due in thirty days.".to_string(),
        selected_parts: parts,
        backend: AnalyzerBackend::Hybrid,
    }
}

#[tokio::test]
async fn start_analysis_validates_input() {
    let dir = tempfile::tempdir().unwrap();
    let api = api_over_corpus(ScriptedChatClient::new().with_default(PASS_JSON), dir.path()).await;

    let mut bad = request(None);
    bad.contract_id = "  ".to_string();
    assert!(matches!(
        api.start_analysis(bad),
        Err(ApiError::BadInput(_))
    ));

    let bad = request(Some(vec![1, 11]));
    assert!(matches!(
        api.start_analysis(bad),
        Err(ApiError::BadInput(_))
    ));
}

#[tokio::test]
async fn default_selection_covers_all_ten_parts() {
    let dir = tempfile::tempdir().unwrap();
    let api = api_over_corpus(ScriptedChatClient::new().with_default(PASS_JSON), dir.path()).await;

    let id = api.start_analysis(request(None)).unwrap();
    let status = wait_terminal(&api, &id).await;
    assert_eq!(status.status, SessionStatus::Completed);
    assert_eq!(status.completed_parts, (1..=10).collect::<Vec<u8>>());
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let api = api_over_corpus(ScriptedChatClient::new(), dir.path()).await;
    let ghost = SessionId::new();

    assert!(matches!(api.get_status(&ghost), Err(ApiError::NotFound(_))));
    assert!(matches!(api.get_report(&ghost), Err(ApiError::NotFound(_))));
    assert!(matches!(api.get_part(&ghost, 1), Err(ApiError::NotFound(_))));
    assert!(matches!(api.cancel(&ghost), Err(ApiError::NotFound(_))));
}

#[tokio::test]
async fn unselected_part_is_not_found_and_report_gates_on_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let api = api_over_corpus(ScriptedChatClient::new().with_default(PASS_JSON), dir.path()).await;

    let id = api.start_analysis(request(Some(vec![2]))).unwrap();
    // Part 5 was never selected, regardless of session state
    assert!(matches!(api.get_part(&id, 5), Err(ApiError::NotFound(_))));

    wait_terminal(&api, &id).await;
    assert!(api.get_report(&id).is_ok());
    assert!(api.get_part(&id, 2).is_ok());
}

#[tokio::test]
async fn hybrid_retrieve_serves_the_chat_path() {
    let dir = tempfile::tempdir().unwrap();
    let api = api_over_corpus(ScriptedChatClient::new(), dir.path()).await;

    let result = api
        .hybrid_retrieve("payment due within thirty days", Some(5))
        .await
        .unwrap();
    assert!(!result.passages.is_empty());
    assert!(result.passages.len() <= 5);
    assert_eq!(result.passages[0].passage.id.as_str(), "P1");
    assert_eq!(result.stats.total_searches, 4);

    // Identical calls return identical rankings
    let again = api
        .hybrid_retrieve("payment due within thirty days", Some(5))
        .await
        .unwrap();
    let ids: Vec<&str> = result.passages.iter().map(|p| p.passage.id.as_str()).collect();
    let ids_again: Vec<&str> = again.passages.iter().map(|p| p.passage.id.as_str()).collect();
    assert_eq!(ids, ids_again);

    assert!(matches!(
        api.hybrid_retrieve("  ", None).await,
        Err(ApiError::BadInput(_))
    ));
    assert!(matches!(
        api.hybrid_retrieve("query", Some(0)).await,
        Err(ApiError::BadInput(_))
    ));
}

#[tokio::test]
async fn list_saved_shows_finished_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let api = api_over_corpus(ScriptedChatClient::new().with_default(PASS_JSON), dir.path()).await;

    let id = api.start_analysis(request(Some(vec![1]))).unwrap();
    wait_terminal(&api, &id).await;

    let saved = api.list_saved().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, id);
    assert_eq!(saved[0].status, SessionStatus::Completed);
    assert_eq!(saved[0].contract_name, "Test Contract");
}

#[tokio::test]
async fn cancel_is_idempotent_on_terminal_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let api = api_over_corpus(ScriptedChatClient::new().with_default(PASS_JSON), dir.path()).await;

    let id = api.start_analysis(request(Some(vec![1]))).unwrap();
    wait_terminal(&api, &id).await;

    // The session already finished; cancel is a no-op, not an error
    assert!(api.cancel(&id).is_ok());
    assert_eq!(
        api.get_status(&id).unwrap().status,
        SessionStatus::Completed
    );
}

#[tokio::test]
async fn operational_endpoints_expose_store_state() {
    let dir = tempfile::tempdir().unwrap();
    let api = api_over_corpus(ScriptedChatClient::new(), dir.path()).await;

    let stats = api.graph_stats().unwrap();
    assert_eq!(stats.passages, 3);
    assert_eq!(stats.nodes, 2);
    assert_eq!(api.list_databases().unwrap(), vec!["memory".to_string()]);
}
