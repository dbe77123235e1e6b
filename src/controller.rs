use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{AnalysisError, SubmitError};
use crate::models::{AnalysisRequest, AnalysisResult, Card, Language};
use crate::settings::SettingsStore;

/// Anything that can turn one request into an analysis result
#[async_trait]
pub trait CardAnalyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError>;
}

/// Lifecycle of the single analysis request a controller manages
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum RequestLifecycleState {
    #[default]
    Idle,
    Pending,
    Success(AnalysisResult),
    Failed(String),
}

impl RequestLifecycleState {
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestLifecycleState::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RequestLifecycleState::Idle => "idle",
            RequestLifecycleState::Pending => "pending",
            RequestLifecycleState::Success(_) => "success",
            RequestLifecycleState::Failed(_) => "failed",
        }
    }
}

/// Inputs of one submission, kept so a retry can re-issue them verbatim
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Submission {
    pub card: Card,
    pub language: Language,
}

/// Point-in-time view of the controller for clients
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub state: RequestLifecycleState,
    pub attempt: u64,
    pub request_id: Option<Uuid>,
    pub last_submission: Option<Submission>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// How a submission ended
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The request ran to completion; the state is `Success` or `Failed`
    Completed {
        attempt: u64,
        request_id: Uuid,
        state: RequestLifecycleState,
    },
    /// Another request was already pending, nothing was dispatched
    Ignored,
}

#[derive(Debug, Default)]
struct ControllerInner {
    state: RequestLifecycleState,
    attempt: u64,
    request_id: Option<Uuid>,
    last_submission: Option<Submission>,
    submitted_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// Drives `Idle -> Pending -> Success | Failed` for one session.
///
/// The state check and the move to `Pending` happen under one lock, so at
/// most one request is ever in flight. The lock is never held across an await.
#[derive(Clone)]
pub struct AnalysisController {
    analyzer: Arc<dyn CardAnalyzer>,
    settings: SettingsStore,
    inner: Arc<Mutex<ControllerInner>>,
}

impl AnalysisController {
    pub fn new(analyzer: Arc<dyn CardAnalyzer>, settings: SettingsStore) -> Self {
        Self {
            analyzer,
            settings,
            inner: Arc::new(Mutex::new(ControllerInner::default())),
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, ControllerInner> {
        lock_inner(&self.inner)
    }

    pub fn state(&self) -> RequestLifecycleState {
        self.lock().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().state.is_pending()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let inner = self.lock();
        ControllerSnapshot {
            state: inner.state.clone(),
            attempt: inner.attempt,
            request_id: inner.request_id,
            last_submission: inner.last_submission.clone(),
            submitted_at: inner.submitted_at,
            completed_at: inner.completed_at,
        }
    }

    /// Submit a card. A no-op returning `Ignored` while a request is pending.
    pub async fn submit(&self, card: Card, language: Language) -> Result<SubmitOutcome, SubmitError> {
        if !card.is_submittable() {
            return Err(SubmitError::IncompleteCard);
        }
        Ok(self.dispatch(Submission { card, language }).await)
    }

    /// Re-issue the last submitted inputs with the current settings
    pub async fn retry(&self) -> Result<SubmitOutcome, SubmitError> {
        let last = self
            .lock()
            .last_submission
            .clone()
            .ok_or(SubmitError::NothingToRetry)?;
        Ok(self.dispatch(last).await)
    }

    async fn dispatch(&self, submission: Submission) -> SubmitOutcome {
        let (attempt, request_id) = {
            let mut inner = self.lock();
            if inner.state.is_pending() {
                warn!(
                    attempt = inner.attempt,
                    "Submission ignored: an analysis request is already in flight"
                );
                return SubmitOutcome::Ignored;
            }

            inner.attempt += 1;
            let request_id = Uuid::new_v4();
            inner.state = RequestLifecycleState::Pending;
            inner.request_id = Some(request_id);
            inner.last_submission = Some(submission.clone());
            inner.submitted_at = Some(Utc::now());
            inner.completed_at = None;
            (inner.attempt, request_id)
        };

        // Settings are read once here; edits made while pending apply to the next submission.
        let request = AnalysisRequest::new(submission.card, submission.language, self.settings.snapshot());
        info!(
            attempt,
            request_id = %request_id,
            provider = ?request.provider_config.provider,
            language = %request.language,
            "Dispatching analysis request"
        );

        // The call and the write-back both live in a spawned task, so the state
        // resolves even if the caller's future is dropped mid-flight.
        let analyzer = Arc::clone(&self.analyzer);
        let inner = Arc::clone(&self.inner);
        let resolution = tokio::spawn(async move {
            let outcome = tokio::spawn(async move { analyzer.analyze(&request).await }).await;
            let state = resolve_outcome(outcome, attempt, request_id);
            complete(&inner, request_id, state.clone());
            state
        });

        let state = match resolution.await {
            Ok(state) => state,
            Err(join_error) => {
                error!(
                    attempt,
                    request_id = %request_id,
                    error = %join_error,
                    "Analysis resolution task did not complete"
                );
                let state = RequestLifecycleState::Failed(UNAVAILABLE_MESSAGE.to_string());
                complete(&self.inner, request_id, state.clone());
                state
            }
        };

        SubmitOutcome::Completed {
            attempt,
            request_id,
            state,
        }
    }
}

const UNAVAILABLE_MESSAGE: &str = "Unable to refine card. Please check your connection or settings.";

fn lock_inner(inner: &Mutex<ControllerInner>) -> MutexGuard<'_, ControllerInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn resolve_outcome(
    outcome: Result<Result<AnalysisResult, AnalysisError>, JoinError>,
    attempt: u64,
    request_id: Uuid,
) -> RequestLifecycleState {
    match outcome {
        Ok(Ok(result)) => RequestLifecycleState::Success(result),
        Ok(Err(analysis_error)) => {
            warn!(
                attempt,
                request_id = %request_id,
                error_kind = analysis_error.kind(),
                error = %analysis_error,
                "Analysis request failed"
            );
            RequestLifecycleState::Failed(analysis_error.user_message())
        }
        Err(join_error) => {
            error!(
                attempt,
                request_id = %request_id,
                error = %join_error,
                "Analysis task did not complete"
            );
            RequestLifecycleState::Failed(UNAVAILABLE_MESSAGE.to_string())
        }
    }
}

/// Record the final state, but only for the request that is still current
fn complete(inner: &Mutex<ControllerInner>, request_id: Uuid, state: RequestLifecycleState) {
    let mut inner = lock_inner(inner);
    if inner.request_id != Some(request_id) || !inner.state.is_pending() {
        return;
    }
    inner.state = state;
    inner.completed_at = Some(Utc::now());

    info!(
        attempt = inner.attempt,
        request_id = %request_id,
        status = inner.state.label(),
        "Analysis request resolved"
    );
}
