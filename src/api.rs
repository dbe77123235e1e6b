use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    controller::{AnalysisController, ControllerSnapshot, RequestLifecycleState, SubmitOutcome},
    errors::{ApiError, ErrorContext},
    models::{Card, Language},
    settings::{SettingsStore, SettingsUpdate, SettingsView},
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

#[derive(Clone)]
pub struct AppState {
    pub controller: AnalysisController,
    pub settings: SettingsStore,
}

impl AppState {
    pub fn new(controller: AnalysisController) -> Self {
        let settings = controller.settings().clone();
        Self { controller, settings }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeCardRequest {
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub language: Language,
}

/// Final state of one dispatched request
#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub attempt: u64,
    pub request_id: Uuid,
    pub state: RequestLifecycleState,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_languages() -> Json<ApiResponse<Vec<Language>>> {
    Json(ApiResponse::success(Language::ALL.to_vec()))
}

// Settings endpoints
pub async fn get_settings(State(state): State<AppState>) -> Json<ApiResponse<SettingsView>> {
    log_api_start!("get_settings");
    Json(ApiResponse::success(state.settings.view()))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Json<ApiResponse<SettingsView>> {
    log_api_start!("update_settings");

    let updated = state.settings.apply(update);
    if state.controller.is_pending() {
        log_api_warn!("update_settings", "settings changed while a request is pending; they apply to the next submission");
    }

    log_api_success!("update_settings", format!("provider set to {:?}", updated.provider));
    Json(ApiResponse::success(SettingsView::from(&updated)))
}

// Analysis endpoints
pub async fn get_analysis(State(state): State<AppState>) -> Json<ApiResponse<ControllerSnapshot>> {
    Json(ApiResponse::success(state.controller.snapshot()))
}

pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeCardRequest>,
) -> ApiResult<AnalysisResponse> {
    log_api_start!("submit_analysis", language = request.language);

    let card = Card::new(request.front, request.back);
    let outcome = state
        .controller
        .submit(card, request.language)
        .await
        .map_err(|e| ApiError::from(e).to_response_with_context(ErrorContext::new("submit_analysis", "analysis")))?;

    respond_with_outcome("submit_analysis", outcome)
}

pub async fn retry_analysis(State(state): State<AppState>) -> ApiResult<AnalysisResponse> {
    log_api_start!("retry_analysis");

    let outcome = state
        .controller
        .retry()
        .await
        .map_err(|e| ApiError::from(e).to_response_with_context(ErrorContext::new("retry_analysis", "analysis")))?;

    respond_with_outcome("retry_analysis", outcome)
}

fn respond_with_outcome(operation: &str, outcome: SubmitOutcome) -> ApiResult<AnalysisResponse> {
    match outcome {
        SubmitOutcome::Completed {
            attempt,
            request_id,
            state,
        } => {
            match &state {
                RequestLifecycleState::Failed(message) => {
                    log_api_error!(operation, attempt = attempt, error = message, "analysis failed");
                }
                other => {
                    log_api_success!(operation, attempt = attempt, status = other.label(), "analysis resolved");
                }
            }
            Ok(Json(ApiResponse::success(AnalysisResponse {
                attempt,
                request_id,
                state,
            })))
        }
        SubmitOutcome::Ignored => {
            let context = ErrorContext::new(operation, "analysis")
                .with_user_message("An analysis request is already in progress. Please wait for it to finish.");
            Err(ApiError::Conflict("request already in flight".to_string()).to_response_with_context(context))
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/languages", get(list_languages))

        // Settings routes
        .route("/api/settings", get(get_settings).put(update_settings))

        // Analysis routes
        .route("/api/analysis", get(get_analysis).post(submit_analysis))
        .route("/api/analysis/retry", post(retry_analysis))

        .with_state(state)
}
