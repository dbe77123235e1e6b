use serde::{Deserialize, Serialize};
use std::fmt;

use crate::llm_providers::{DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL, LLMProviderType};

/// Flashcard content as typed by the user. Either side may contain HTML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Card {
    pub front: String,
    pub back: String,
}

impl Card {
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
        }
    }

    /// A card can only be submitted once both sides carry some text.
    pub fn is_submittable(&self) -> bool {
        !self.front.trim().is_empty() && !self.back.trim().is_empty()
    }
}

/// Language used for the explanation, critique and suggestion reasons
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Language {
    English,
    #[default]
    #[serde(rename = "Simplified Chinese")]
    SimplifiedChinese,
    #[serde(rename = "Traditional Chinese")]
    TraditionalChinese,
    Japanese,
    Korean,
    Spanish,
    French,
    German,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Language::English,
        Language::SimplifiedChinese,
        Language::TraditionalChinese,
        Language::Japanese,
        Language::Korean,
        Language::Spanish,
        Language::French,
        Language::German,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::SimplifiedChinese => "Simplified Chinese",
            Language::TraditionalChinese => "Traditional Chinese",
            Language::Japanese => "Japanese",
            Language::Korean => "Korean",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider settings for the current session, edited through the settings API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub provider: LLMProviderType,
    /// May be empty; the Gemini provider then falls back to the process-level key.
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: LLMProviderType::Gemini,
            api_key: String::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
        }
    }
}

/// Everything one analysis call needs. Built fresh for every submission.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub front: String,
    pub back: String,
    pub language: Language,
    pub provider_config: ProviderConfig,
}

impl AnalysisRequest {
    pub fn new(card: Card, language: Language, provider_config: ProviderConfig) -> Self {
        Self {
            front: card.front,
            back: card.back,
            language,
            provider_config,
        }
    }
}

/// One proposed replacement card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Suggestion {
    pub front: String, // HTML
    pub back: String,  // HTML
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisResult {
    pub explanation: String,
    pub critique: String,
    pub suggestions: Vec<Suggestion>,
}

impl AnalysisResult {
    /// Path of the first required text field that is blank, if any.
    ///
    /// An empty `suggestions` list is accepted; blank fields inside a
    /// suggestion are not.
    pub fn first_blank_field(&self) -> Option<String> {
        if self.explanation.trim().is_empty() {
            return Some("explanation".to_string());
        }
        if self.critique.trim().is_empty() {
            return Some("critique".to_string());
        }

        self.suggestions
            .iter()
            .enumerate()
            .find_map(|(index, suggestion)| {
                [
                    ("front", &suggestion.front),
                    ("back", &suggestion.back),
                    ("reason", &suggestion.reason),
                ]
                .into_iter()
                .find(|(_, value)| value.trim().is_empty())
                .map(|(name, _)| format!("suggestions[{}].{}", index, name))
            })
    }
}
