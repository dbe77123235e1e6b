use crate::api::ApiResponse;
use axum::{http::StatusCode, response::Json};
use tracing::warn;

/// Failures produced by a provider adapter and passed through the dispatcher unchanged
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// A required credential could not be resolved
    #[error("{0}")]
    Configuration(String),

    /// The provider answered but carried no usable content
    #[error("{0}")]
    EmptyResponse(String),

    #[error("Failed to parse JSON response: {0}")]
    Parse(String),

    #[error("Provider API Error: {status} {message}")]
    ProviderHttp { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AnalysisError {
    /// Short stable name used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Configuration(_) => "configuration",
            AnalysisError::EmptyResponse(_) => "empty_response",
            AnalysisError::Parse(_) => "parse",
            AnalysisError::ProviderHttp { .. } => "provider_http",
            AnalysisError::Transport(_) => "transport",
        }
    }

    /// Message shown next to the "try again" action
    pub fn user_message(&self) -> String {
        match self {
            AnalysisError::Transport(_) => {
                "Unable to refine card. Please check your connection or settings.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Rejections raised by the controller before anything is dispatched
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Both the front and the back of the card are required")]
    IncompleteCard,

    #[error("There is no previous submission to retry")]
    NothingToRetry,
}

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::IncompleteCard => ApiError::ValidationError(err.to_string()),
            SubmitError::NothingToRetry => ApiError::BadRequest(err.to_string()),
        }
    }
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_type: String,
    pub user_friendly_message: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_type: resource_type.to_string(),
            user_friendly_message: None,
        }
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_friendly_message = Some(message.to_string());
        self
    }
}

impl ApiError {
    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> (StatusCode, Json<ApiResponse<()>>) {
        let status = match &self {
            ApiError::ValidationError(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        };

        warn!(
            operation = %context.operation,
            resource_type = %context.resource_type,
            status = status.as_u16(),
            error = %self,
            "Request rejected"
        );

        let message = context
            .user_friendly_message
            .unwrap_or_else(|| self.to_string());

        (status, Json(ApiResponse::error(message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_creation() {
        let context = ErrorContext::new("submit_analysis", "analysis")
            .with_user_message("Custom message");

        assert_eq!(context.operation, "submit_analysis");
        assert_eq!(context.resource_type, "analysis");
        assert_eq!(
            context.user_friendly_message,
            Some("Custom message".to_string())
        );
    }

    #[test]
    fn test_provider_http_message_includes_status() {
        let error = AnalysisError::ProviderHttp {
            status: 429,
            message: "Rate limit reached".to_string(),
        };
        assert_eq!(error.to_string(), "Provider API Error: 429 Rate limit reached");
        assert_eq!(error.user_message(), error.to_string());
        assert_eq!(error.kind(), "provider_http");
    }

    #[test]
    fn test_configuration_message_is_passed_through() {
        let error = AnalysisError::Configuration("API Key is missing.".to_string());
        assert_eq!(error.user_message(), "API Key is missing.");
        assert_eq!(error.kind(), "configuration");
    }

    #[test]
    fn test_api_error_responses() {
        let context = ErrorContext::new("submit_analysis", "analysis");
        let (status, _) = ApiError::from(SubmitError::IncompleteCard).to_response_with_context(context);
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let context = ErrorContext::new("submit_analysis", "analysis");
        let (status, _) = ApiError::Conflict("busy".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::CONFLICT);

        let context = ErrorContext::new("retry_analysis", "analysis")
            .with_user_message("Nothing to retry yet");
        let (status, Json(body)) =
            ApiError::from(SubmitError::NothingToRetry).to_response_with_context(context);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.as_deref(), Some("Nothing to retry yet"));
    }
}
