use anki_refine::{
    AnalysisController, AnalysisError, AnalysisRequest, AnalysisResult, Card, CardAnalyzer,
    LLMProviderType, LLMService, Language, ProviderConfig, RequestLifecycleState, SettingsStore,
    SettingsUpdate, SubmitError, SubmitOutcome, Suggestion,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Analyzer that replays scripted outcomes and records every request it sees
#[derive(Default)]
struct ScriptedAnalyzer {
    outcomes: Mutex<VecDeque<Result<AnalysisResult, AnalysisError>>>,
    requests: Mutex<Vec<AnalysisRequest>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedAnalyzer {
    fn new(outcomes: Vec<Result<AnalysisResult, AnalysisError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    fn gated(outcomes: Vec<Result<AnalysisResult, AnalysisError>>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(outcomes)
        }
    }

    fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CardAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AnalysisError::EmptyResponse("script exhausted".to_string())))
    }
}

fn analysis(tag: &str) -> AnalysisResult {
    AnalysisResult {
        explanation: format!("explanation {}", tag),
        critique: format!("critique {}", tag),
        suggestions: vec![Suggestion {
            front: format!("<b>front {}</b>", tag),
            back: format!("<i>back {}</i>", tag),
            reason: format!("reason {}", tag),
        }],
    }
}

fn paris() -> Card {
    Card::new("Capital of France", "Paris")
}

fn controller_with(analyzer: Arc<ScriptedAnalyzer>, settings: SettingsStore) -> AnalysisController {
    AnalysisController::new(analyzer, settings)
}

async fn wait_until_pending(controller: &AnalysisController) {
    for _ in 0..1000 {
        if controller.is_pending() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("controller never entered the pending state");
}

async fn wait_until_settled(controller: &AnalysisController) {
    for _ in 0..1000 {
        if !controller.is_pending() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("controller never left the pending state");
}

#[tokio::test]
async fn test_submit_moves_from_idle_to_success() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![Ok(analysis("a"))]));
    let controller = controller_with(analyzer.clone(), SettingsStore::default());
    assert_eq!(controller.state(), RequestLifecycleState::Idle);

    let outcome = controller.submit(paris(), Language::English).await.unwrap();

    match outcome {
        SubmitOutcome::Completed { attempt, state, .. } => {
            assert_eq!(attempt, 1);
            assert_eq!(state, RequestLifecycleState::Success(analysis("a")));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, RequestLifecycleState::Success(analysis("a")));
    assert!(snapshot.submitted_at.is_some());
    assert!(snapshot.completed_at.is_some());

    let requests = analyzer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].front, "Capital of France");
    assert_eq!(requests[0].back, "Paris");
    assert_eq!(requests[0].language, Language::English);
}

#[tokio::test]
async fn test_failure_surfaces_message_and_retry_resolves_independently() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![
        Err(AnalysisError::ProviderHttp {
            status: 503,
            message: "Service Unavailable".to_string(),
        }),
        Ok(analysis("retry")),
    ]));
    let controller = controller_with(analyzer.clone(), SettingsStore::default());

    controller.submit(paris(), Language::German).await.unwrap();
    assert_eq!(
        controller.state(),
        RequestLifecycleState::Failed("Provider API Error: 503 Service Unavailable".to_string())
    );

    let outcome = controller.retry().await.unwrap();
    match outcome {
        SubmitOutcome::Completed { attempt, state, .. } => {
            assert_eq!(attempt, 2);
            assert_eq!(state, RequestLifecycleState::Success(analysis("retry")));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let requests = analyzer.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1], "retry must re-issue the exact same inputs");
}

#[tokio::test]
async fn test_submit_while_pending_is_ignored() {
    let gate = Arc::new(Notify::new());
    let analyzer = Arc::new(ScriptedAnalyzer::gated(vec![Ok(analysis("first"))], gate.clone()));
    let controller = controller_with(analyzer.clone(), SettingsStore::default());

    let background = controller.clone();
    let first = tokio::spawn(async move { background.submit(paris(), Language::English).await });

    wait_until_pending(&controller).await;

    let second = controller
        .submit(Card::new("Another", "Card"), Language::Japanese)
        .await
        .unwrap();
    assert_eq!(second, SubmitOutcome::Ignored);
    assert_eq!(controller.retry().await.unwrap(), SubmitOutcome::Ignored);
    assert!(controller.is_pending());

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(matches!(
        first,
        SubmitOutcome::Completed { state: RequestLifecycleState::Success(_), .. }
    ));

    assert_eq!(analyzer.requests().len(), 1);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.attempt, 1);
    assert_eq!(snapshot.last_submission.unwrap().card, paris());
}

#[tokio::test]
async fn test_concurrent_submissions_dispatch_once() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![Ok(analysis("only"))]));
    let controller = controller_with(analyzer.clone(), SettingsStore::default());

    let submissions = (0..5).map(|_| controller.submit(paris(), Language::English));
    let outcomes = futures_util::future::join_all(submissions).await;

    let completed = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Ok(SubmitOutcome::Completed { .. })))
        .count();
    let ignored = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Ok(SubmitOutcome::Ignored)))
        .count();

    assert_eq!(completed, 1);
    assert_eq!(ignored, 4);
    assert_eq!(analyzer.requests().len(), 1);
}

#[tokio::test]
async fn test_dropped_submission_still_resolves_state() {
    let gate = Arc::new(Notify::new());
    let analyzer = Arc::new(ScriptedAnalyzer::gated(
        vec![Ok(analysis("late")), Ok(analysis("next"))],
        gate.clone(),
    ));
    let controller = controller_with(analyzer.clone(), SettingsStore::default());

    // The caller gives up while the analysis is still running
    let abandoned = tokio::time::timeout(
        Duration::from_millis(5),
        controller.submit(paris(), Language::English),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(controller.is_pending());

    gate.notify_one();
    wait_until_settled(&controller).await;
    assert_eq!(controller.state(), RequestLifecycleState::Success(analysis("late")));
    assert!(controller.snapshot().completed_at.is_some());

    gate.notify_one();
    let next = controller.submit(paris(), Language::English).await.unwrap();
    assert!(matches!(
        next,
        SubmitOutcome::Completed { attempt: 2, state: RequestLifecycleState::Success(_), .. }
    ));
    assert_eq!(analyzer.requests().len(), 2);
}

#[tokio::test]
async fn test_incomplete_card_is_rejected_without_dispatch() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![]));
    let controller = controller_with(analyzer.clone(), SettingsStore::default());

    let result = controller.submit(Card::new("  ", "Paris"), Language::English).await;
    assert_eq!(result, Err(SubmitError::IncompleteCard));
    assert_eq!(controller.state(), RequestLifecycleState::Idle);
    assert!(analyzer.requests().is_empty());
}

#[tokio::test]
async fn test_retry_without_submission_is_rejected() {
    let controller = controller_with(Arc::new(ScriptedAnalyzer::new(vec![])), SettingsStore::default());
    assert_eq!(controller.retry().await, Err(SubmitError::NothingToRetry));
}

#[tokio::test]
async fn test_settings_edit_while_pending_applies_to_next_submission() {
    let gate = Arc::new(Notify::new());
    let analyzer = Arc::new(ScriptedAnalyzer::gated(
        vec![Ok(analysis("one")), Ok(analysis("two"))],
        gate.clone(),
    ));
    let settings = SettingsStore::new(ProviderConfig {
        provider: LLMProviderType::OpenAI,
        api_key: "sk-old".to_string(),
        ..ProviderConfig::default()
    });
    let controller = controller_with(analyzer.clone(), settings.clone());

    let background = controller.clone();
    let first = tokio::spawn(async move { background.submit(paris(), Language::English).await });
    wait_until_pending(&controller).await;

    settings.apply(SettingsUpdate {
        api_key: Some("sk-new".to_string()),
        ..SettingsUpdate::default()
    });

    gate.notify_one();
    first.await.unwrap().unwrap();

    gate.notify_one();
    controller.retry().await.unwrap();

    let requests = analyzer.requests();
    assert_eq!(requests[0].provider_config.api_key, "sk-old");
    assert_eq!(requests[1].provider_config.api_key, "sk-new");
}

#[tokio::test]
async fn test_success_result_is_replaced_only_by_next_submission() {
    let analyzer = Arc::new(ScriptedAnalyzer::new(vec![
        Ok(analysis("first")),
        Err(AnalysisError::Parse("expected value at line 1 column 1".to_string())),
    ]));
    let controller = controller_with(analyzer, SettingsStore::default());

    controller.submit(paris(), Language::English).await.unwrap();
    assert_eq!(controller.state(), RequestLifecycleState::Success(analysis("first")));
    assert_eq!(controller.state(), RequestLifecycleState::Success(analysis("first")));

    controller.submit(paris(), Language::English).await.unwrap();
    match controller.state() {
        RequestLifecycleState::Failed(message) => assert!(message.starts_with("Failed to parse JSON response")),
        other => panic!("expected failed state, got {:?}", other),
    }
}

#[tokio::test]
async fn test_generic_provider_with_empty_key_fails_immediately() {
    let settings = SettingsStore::new(ProviderConfig {
        provider: LLMProviderType::OpenAI,
        api_key: String::new(),
        base_url: "http://127.0.0.1:1".to_string(),
        ..ProviderConfig::default()
    });
    let controller = AnalysisController::new(Arc::new(LLMService::default()), settings);

    controller.submit(paris(), Language::English).await.unwrap();
    match controller.state() {
        RequestLifecycleState::Failed(message) => assert!(message.contains("API Key is missing")),
        other => panic!("expected failed state, got {:?}", other),
    }
}

#[tokio::test]
async fn test_managed_provider_without_default_key_fails() {
    let controller = AnalysisController::new(Arc::new(LLMService::default()), SettingsStore::default());

    controller.submit(paris(), Language::SimplifiedChinese).await.unwrap();
    match controller.state() {
        RequestLifecycleState::Failed(message) => {
            assert_eq!(message, "API Key is missing. Please configure your environment or settings.");
        }
        other => panic!("expected failed state, got {:?}", other),
    }
}
