use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info};

use crate::errors::AnalysisError;
use crate::log_llm_operation;
use crate::models::{AnalysisResult, Language, ProviderConfig};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_APP_ORIGIN: &str = "http://localhost:3000";
pub const APP_TITLE: &str = "Anki Refine";

const GEMINI_THINKING_BUDGET: u32 = 32768;
const OPENAI_TEMPERATURE: f32 = 0.7;

/// Common message structure for chat-completion requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

/// Values resolved once at startup and threaded into every provider call
#[derive(Debug, Clone)]
pub struct ProviderDefaults {
    /// Process-level key used by Gemini when the session has none
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    /// Sent as `HTTP-Referer` to OpenAI-compatible gateways
    pub app_origin: String,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            app_origin: DEFAULT_APP_ORIGIN.to_string(),
        }
    }
}

/// Enum-based LLM provider: exactly one variant per supported protocol
#[derive(Debug, Clone)]
pub enum LLMProvider {
    OpenAI(OpenAIProvider),
    Gemini(GeminiProvider),
}

impl LLMProvider {
    /// Explain, critique and rewrite one card
    pub async fn analyze(
        &self,
        front: &str,
        back: &str,
        language: Language,
    ) -> Result<AnalysisResult, AnalysisError> {
        match self {
            LLMProvider::OpenAI(provider) => provider.analyze(front, back, language).await,
            LLMProvider::Gemini(provider) => provider.analyze(front, back, language).await,
        }
    }

    /// Get the provider name for logging
    pub fn provider_name(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI(provider) => provider.provider_name(),
            LLMProvider::Gemini(provider) => provider.provider_name(),
        }
    }

    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        match self {
            LLMProvider::OpenAI(provider) => provider.model_name(),
            LLMProvider::Gemini(provider) => provider.model_name(),
        }
    }
}

/// Shape of `{error: {message}}` bodies returned by both providers on failure
#[derive(Debug, Deserialize)]
struct ProviderErrorEnvelope {
    error: Option<ProviderErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: Option<String>,
}

fn provider_http_error(status: StatusCode, body: &str) -> AnalysisError {
    let message = serde_json::from_str::<ProviderErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|error| error.message)
        .filter(|message| !message.trim().is_empty())
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "Unknown error".to_string());

    AnalysisError::ProviderHttp {
        status: status.as_u16(),
        message,
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

// ============================================================================
// OpenAI-compatible chat completions
// ============================================================================

/// OpenAI-compatible provider (OpenAI, OpenRouter, local gateways)
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    app_origin: String,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<LLMMessage>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChoice {
    message: Option<OpenAIChoiceMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChoiceMessage {
    content: Option<String>,
}

impl OpenAIProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>, app_origin: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .filter(|url| !is_blank(url))
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            model: model
                .filter(|model| !is_blank(model))
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            app_origin,
        }
    }

    /// `{base_url}/chat/completions`, tolerating one trailing slash on the base
    pub fn endpoint(&self) -> String {
        let base = self.base_url.strip_suffix('/').unwrap_or(&self.base_url);
        format!("{}/chat/completions", base)
    }

    pub async fn analyze(
        &self,
        front: &str,
        back: &str,
        language: Language,
    ) -> Result<AnalysisResult, AnalysisError> {
        if is_blank(&self.api_key) {
            return Err(AnalysisError::Configuration(
                "API Key is missing. Please add it in Settings.".to_string(),
            ));
        }

        let system_prompt = openai_system_prompt(language);
        let user_prompt = openai_user_prompt(front, back, language);
        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![
                LLMMessage {
                    role: "system".to_string(),
                    content: system_prompt,
                },
                LLMMessage {
                    role: "user".to_string(),
                    content: user_prompt,
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: OPENAI_TEMPERATURE,
        };

        let endpoint = self.endpoint();
        info!(
            provider = self.provider_name(),
            model = %self.model,
            endpoint = %endpoint,
            language = %language,
            "Making LLM request"
        );
        let started = Instant::now();

        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.app_origin)
            .header("X-Title", APP_TITLE)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            debug!(
                provider = self.provider_name(),
                status = %status,
                body = %body,
                "LLM API request failed"
            );
            return Err(provider_http_error(status, &body));
        }

        let envelope: OpenAIResponse = serde_json::from_str(&body)
            .map_err(|e| AnalysisError::Parse(format!("unexpected chat completion payload: {}", e)))?;

        let content = envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !is_blank(content))
            .ok_or_else(|| AnalysisError::EmptyResponse("No content received from API.".to_string()))?;

        debug!(
            provider = self.provider_name(),
            response_content = %content,
            "Raw LLM response"
        );

        let result = JsonResponseParser.parse_analysis(&content)?;
        log_llm_operation!(
            success,
            "analyze_card",
            provider = self.provider_name(),
            duration_ms = started.elapsed().as_millis() as u64,
            suggestions = result.suggestions.len()
        );

        Ok(result)
    }

    pub fn provider_name(&self) -> &'static str {
        "OpenAI"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

fn openai_system_prompt(language: Language) -> String {
    format!(
        r#"You are an expert in learning science, specifically focused on Spaced Repetition and the Minimum Information Principle (SuperMemo 20 rules).
Your task is to analyze Anki flashcards, explain concepts, critique the card design, and suggest improvements.

Output JSON format only. The JSON must match this schema:
{{
  "explanation": "string (Detailed explanation in {language})",
  "critique": "string (Critique of structure/atomicity in {language})",
  "suggestions": [
    {{
      "front": "string (HTML format for Anki front)",
      "back": "string (HTML format for Anki back)",
      "reason": "string (Why this is better, in {language})"
    }}
  ]
}}

IMPORTANT:
- For 'front' and 'back', use standard HTML tags (<b>, <i>, <br>, <ul>, <li>, <code>).
- DO NOT use Markdown formatting in 'front' or 'back'."#
    )
}

fn openai_user_prompt(front: &str, back: &str, language: Language) -> String {
    format!(
        r#"Analyze this card:
FRONT: {front}
BACK: {back}

1. Explain the meaning in {language}.
2. Critique the card structure in {language}.
3. Suggest improved atomic versions."#
    )
}

// ============================================================================
// Gemini generateContent with structured output
// ============================================================================

/// Gemini provider. The key is already resolved against the process default.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
    thinking_config: GeminiThinkingConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

impl GeminiResponse {
    /// Text of the first candidate, skipping thought parts
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content
            .parts
            .into_iter()
            .filter(|part| part.thought != Some(true))
            .filter_map(|part| part.text)
            .collect();

        if is_blank(&text) { None } else { Some(text) }
    }
}

impl GeminiProvider {
    /// `api_key` wins over `default_key`; blank values count as absent.
    pub fn new(
        api_key: Option<String>,
        default_key: Option<String>,
        base_url: Option<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key
                .filter(|key| !is_blank(key))
                .or_else(|| default_key.filter(|key| !is_blank(key))),
            base_url: base_url
                .filter(|url| !is_blank(url))
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            model: model
                .filter(|model| !is_blank(model))
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        }
    }

    pub fn endpoint(&self) -> String {
        let base = self.base_url.strip_suffix('/').unwrap_or(&self.base_url);
        format!("{}/models/{}:generateContent", base, self.model)
    }

    pub async fn analyze(
        &self,
        front: &str,
        back: &str,
        language: Language,
    ) -> Result<AnalysisResult, AnalysisError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AnalysisError::Configuration(
                "API Key is missing. Please configure your environment or settings.".to_string(),
            ));
        };

        let prompt = gemini_prompt(front, back, language);
        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: Some(prompt),
                    thought: None,
                }],
            }],
            generation_config: GeminiGenerationConfig {
                response_mime_type: "application/json",
                response_schema: analysis_schema(),
                thinking_config: GeminiThinkingConfig {
                    thinking_budget: GEMINI_THINKING_BUDGET,
                },
            },
        };

        let endpoint = self.endpoint();
        info!(
            provider = self.provider_name(),
            model = %self.model,
            endpoint = %endpoint,
            language = %language,
            "Making LLM request"
        );
        let started = Instant::now();

        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            debug!(
                provider = self.provider_name(),
                status = %status,
                body = %body,
                "LLM API request failed"
            );
            return Err(provider_http_error(status, &body));
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| AnalysisError::Parse(format!("unexpected generateContent payload: {}", e)))?;

        let text = gemini_response
            .text()
            .ok_or_else(|| AnalysisError::EmptyResponse("No response received from Gemini.".to_string()))?;

        debug!(
            provider = self.provider_name(),
            response_content = %text,
            "Raw LLM response"
        );

        let result = JsonResponseParser.parse_analysis(&text)?;
        log_llm_operation!(
            success,
            "analyze_card",
            provider = self.provider_name(),
            duration_ms = started.elapsed().as_millis() as u64,
            suggestions = result.suggestions.len()
        );

        Ok(result)
    }

    pub fn provider_name(&self) -> &'static str {
        "Gemini"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Response schema handed to Gemini so it returns an `AnalysisResult` directly
pub fn analysis_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "explanation": {
                "type": "STRING",
                "description": "A detailed explanation of the concept covered in the card to ensure the user understands it."
            },
            "critique": {
                "type": "STRING",
                "description": "A critique of the card based on the minimum information principle and other Anki best practices."
            },
            "suggestions": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "front": { "type": "STRING", "description": "The front text of the improved card (HTML format)." },
                        "back": { "type": "STRING", "description": "The back text of the improved card (HTML format)." },
                        "reason": { "type": "STRING", "description": "Why this version is better." }
                    },
                    "required": ["front", "back", "reason"]
                },
                "description": "A list of one or more improved versions of the card, split into atomic facts if necessary."
            }
        },
        "required": ["explanation", "critique", "suggestions"]
    })
}

fn gemini_prompt(front: &str, back: &str, language: Language) -> String {
    format!(
        r#"I am studying using Anki flashcards. I want you to act as an expert in learning science, specifically focused on Spaced Repetition and the Minimum Information Principle (SuperMemo 20 rules).

Here is my current card:
FRONT: {front}
BACK: {back}

Please perform the following tasks:
1. Explain the meaning of the content on this card to ensure I fully understand it. The explanation MUST be in {language}.
2. Critique the card structure. Is it too vague? Too complex? Does it have context clues that give away the answer? Is it atomic enough? The critique MUST be in {language}.
3. Suggest one or more improved versions of this card. If the original card covers multiple facts, split them into multiple atomic cards.

IMPORTANT FORMATTING RULES:
- The 'front' and 'back' fields of the suggested cards MUST be formatted using standard HTML tags supported by Anki (e.g., <b>, <i>, <u>, <br>, <ul>, <li>, <code>, <pre>).
- Do NOT use Markdown syntax (like **, ##, -) for the 'front' and 'back' fields. Anki does not render Markdown natively.
- Ensure code snippets are wrapped in <code> tags or <pre><code> blocks if multi-line.
- The 'reason' field should be in {language}.

Think deeply about the best way to formulate these memories for long-term retention."#
    )
}

// ============================================================================
// Response parsing and provider construction
// ============================================================================

/// Centralized JSON response parser with robust extraction logic
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResponseParser;

impl JsonResponseParser {
    /// Extract the JSON object from responses that might be wrapped in markdown fences
    pub fn extract_json_from_response(content: &str) -> String {
        if let Some(start) = content.find("```json") {
            if let Some(end) = content[start + 7..].find("```") {
                let json_start = start + 7;
                return content[json_start..json_start + end].trim().to_string();
            }
        }

        if let Some(start) = content.find("```") {
            if let Some(end) = content[start + 3..].find("```") {
                let json_start = start + 3;
                let potential_json = content[json_start..json_start + end].trim();
                if potential_json.starts_with('{') {
                    return potential_json.to_string();
                }
            }
        }

        if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
            if end > start {
                return content[start..=end].to_string();
            }
        }

        content.trim().to_string()
    }

    /// Parse provider text into a fully populated `AnalysisResult`
    pub fn parse_analysis(&self, content: &str) -> Result<AnalysisResult, AnalysisError> {
        // Parse as-is first; string fields may legitimately contain fenced code.
        let result: AnalysisResult = match serde_json::from_str(content.trim()) {
            Ok(result) => result,
            Err(_) => {
                let json_content = Self::extract_json_from_response(content);
                serde_json::from_str(&json_content).map_err(|e| AnalysisError::Parse(e.to_string()))?
            }
        };

        if let Some(field) = result.first_blank_field() {
            return Err(AnalysisError::Parse(format!("required field '{}' is empty", field)));
        }

        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum LLMProviderType {
    #[default]
    Gemini,
    OpenAI,
}

impl LLMProviderType {
    /// Lenient parse used for environment values; unknown names fall back to Gemini.
    pub fn from_config_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "gemini" | "google" => Some(LLMProviderType::Gemini),
            "openai" | "chatgpt" | "gpt" => Some(LLMProviderType::OpenAI),
            _ => None,
        }
    }
}

/// Factory for creating LLM providers based on provider type
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Build a provider for one call from the session settings and the startup defaults
    pub fn create_provider(config: &ProviderConfig, defaults: &ProviderDefaults) -> LLMProvider {
        match config.provider {
            LLMProviderType::OpenAI => LLMProvider::OpenAI(OpenAIProvider::new(
                config.api_key.clone(),
                Some(config.base_url.clone()),
                Some(config.model.clone()),
                defaults.app_origin.clone(),
            )),
            LLMProviderType::Gemini => LLMProvider::Gemini(GeminiProvider::new(
                Some(config.api_key.clone()),
                defaults.gemini_api_key.clone(),
                Some(defaults.gemini_base_url.clone()),
                Some(defaults.gemini_model.clone()),
            )),
        }
    }
}
