use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::mask_sensitive_data;
use crate::llm_providers::{DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL, LLMProviderType};
use crate::models::ProviderConfig;

/// Partial settings update; absent fields keep their current value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub provider: Option<LLMProviderType>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// Settings as returned to clients. The key itself never leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingsView {
    pub provider: LLMProviderType,
    pub has_api_key: bool,
    pub api_key_masked: String,
    pub base_url: String,
    pub model: String,
}

impl From<&ProviderConfig> for SettingsView {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            provider: config.provider,
            has_api_key: !config.api_key.trim().is_empty(),
            api_key_masked: mask_sensitive_data(&config.api_key),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        }
    }
}

/// In-memory provider settings shared by the API and the controller.
///
/// Readers take a snapshot, so an edit made while a request is in flight
/// only affects the next submission.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    inner: Arc<RwLock<ProviderConfig>>,
}

impl SettingsStore {
    pub fn new(initial: ProviderConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn snapshot(&self) -> ProviderConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply an update and return the resulting settings.
    ///
    /// A blank base URL or model resets that field to the OpenAI default.
    pub fn apply(&self, update: SettingsUpdate) -> ProviderConfig {
        let mut config = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(provider) = update.provider {
            config.provider = provider;
        }
        if let Some(api_key) = update.api_key {
            config.api_key = api_key.trim().to_string();
        }
        if let Some(base_url) = update.base_url {
            config.base_url = non_blank_or(base_url, DEFAULT_OPENAI_BASE_URL);
        }
        if let Some(model) = update.model {
            config.model = non_blank_or(model, DEFAULT_OPENAI_MODEL);
        }

        config.clone()
    }

    pub fn view(&self) -> SettingsView {
        SettingsView::from(&self.snapshot())
    }
}

fn non_blank_or(value: String, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_partial_update() {
        let store = SettingsStore::default();
        let updated = store.apply(SettingsUpdate {
            provider: Some(LLMProviderType::OpenAI),
            api_key: Some(" sk-1234567890abcdef ".to_string()),
            ..SettingsUpdate::default()
        });

        assert_eq!(updated.provider, LLMProviderType::OpenAI);
        assert_eq!(updated.api_key, "sk-1234567890abcdef");
        assert_eq!(updated.base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(store.snapshot(), updated);
    }

    #[test]
    fn test_blank_base_url_and_model_reset_to_defaults() {
        let store = SettingsStore::new(ProviderConfig {
            provider: LLMProviderType::OpenAI,
            api_key: "sk-test".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "anthropic/claude-3.5-sonnet".to_string(),
        });

        let updated = store.apply(SettingsUpdate {
            base_url: Some("   ".to_string()),
            model: Some(String::new()),
            ..SettingsUpdate::default()
        });
        assert_eq!(updated.base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(updated.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(updated.api_key, "sk-test");
    }

    #[test]
    fn test_snapshot_is_detached_from_later_edits() {
        let store = SettingsStore::default();
        let before = store.snapshot();
        store.apply(SettingsUpdate {
            model: Some("gpt-4o-mini".to_string()),
            ..SettingsUpdate::default()
        });
        assert_eq!(before.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(store.snapshot().model, "gpt-4o-mini");
    }

    #[test]
    fn test_view_masks_key() {
        let store = SettingsStore::new(ProviderConfig {
            api_key: "sk-1234567890abcdef".to_string(),
            ..ProviderConfig::default()
        });
        let view = store.view();
        assert!(view.has_api_key);
        assert_eq!(view.api_key_masked, "sk-1***cdef");

        let empty = SettingsStore::default().view();
        assert!(!empty.has_api_key);
        assert_eq!(empty.api_key_masked, "");
    }
}
