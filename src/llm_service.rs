use async_trait::async_trait;

use crate::controller::CardAnalyzer;
use crate::errors::AnalysisError;
use crate::llm_providers::{LLMProviderFactory, ProviderDefaults};
use crate::log_llm_operation;
use crate::models::{AnalysisRequest, AnalysisResult};

/// Routes each analysis request to the provider named in its settings.
///
/// The only state kept here is what was resolved at startup; a provider is
/// built per call from the request's own settings, so calls with different
/// keys never share credentials.
#[derive(Debug, Clone, Default)]
pub struct LLMService {
    defaults: ProviderDefaults,
}

impl LLMService {
    pub fn new(defaults: ProviderDefaults) -> Self {
        Self { defaults }
    }

    pub async fn analyze_card(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let provider = LLMProviderFactory::create_provider(&request.provider_config, &self.defaults);

        log_llm_operation!(
            start,
            "analyze_card",
            provider = provider.provider_name(),
            model = provider.model_name()
        );

        let outcome = provider
            .analyze(&request.front, &request.back, request.language)
            .await;

        if let Err(error) = &outcome {
            log_llm_operation!(error, "analyze_card", provider = provider.provider_name(), error = error);
        }

        outcome
    }
}

#[async_trait]
impl CardAnalyzer for LLMService {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        self.analyze_card(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_providers::LLMProviderType;
    use crate::models::{Card, Language, ProviderConfig};

    fn request(provider: LLMProviderType, api_key: &str) -> AnalysisRequest {
        AnalysisRequest::new(
            Card::new("Capital of France", "Paris"),
            Language::English,
            ProviderConfig {
                provider,
                api_key: api_key.to_string(),
                // Unroutable so a bug that skips the key check fails fast instead of hanging
                base_url: "http://127.0.0.1:9".to_string(),
                ..ProviderConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_openai_without_key_is_configuration_error() {
        let service = LLMService::default();
        let result = service.analyze_card(&request(LLMProviderType::OpenAI, "")).await;
        match result {
            Err(AnalysisError::Configuration(message)) => assert!(message.contains("API Key is missing")),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gemini_without_any_key_is_configuration_error() {
        let service = LLMService::default();
        let result = service.analyze_card(&request(LLMProviderType::Gemini, "  ")).await;
        assert!(matches!(result, Err(AnalysisError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_openai_ignores_gemini_default_key() {
        let service = LLMService::new(ProviderDefaults {
            gemini_api_key: Some("env-key".to_string()),
            ..ProviderDefaults::default()
        });
        let result = service.analyze_card(&request(LLMProviderType::OpenAI, "")).await;
        assert!(matches!(result, Err(AnalysisError::Configuration(_))));
    }
}
