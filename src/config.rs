use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use tracing::{info, warn};

use crate::llm_providers::{
    LLMProviderType, ProviderDefaults, DEFAULT_APP_ORIGIN, DEFAULT_GEMINI_BASE_URL,
    DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL,
};
use crate::models::ProviderConfig;

// Import logging macros
use crate::{log_system_event, log_validation};

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub llm: LLMConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Provider configuration: startup defaults plus the initial session settings
#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    /// Process-level Gemini key, used when the session has no key of its own
    pub default_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub provider: LLMProviderType,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub app_origin: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            llm: LLMConfig::from_lookup(lookup),
            server: ServerConfig::from_lookup(lookup)?,
            logging: LoggingConfig::from_lookup(lookup),
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            llm_provider = ?self.llm.provider,
            llm_model = %self.llm.model,
            gemini_model = %self.llm.gemini_model,
            default_key_masked = %mask_sensitive_data(self.llm.default_api_key.as_deref().unwrap_or("")),
            session_key_masked = %mask_sensitive_data(&self.llm.api_key),
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            let error = anyhow!("Server port must be greater than 0");
            log_validation!(failure, "configuration", error = error);
            return Err(error);
        }

        match self.llm.provider {
            LLMProviderType::Gemini
                if self.llm.default_api_key.is_none() && self.llm.api_key.trim().is_empty() =>
            {
                warn!("No Gemini API key configured - requests will fail until a key is set in Settings");
            }
            LLMProviderType::OpenAI if self.llm.api_key.trim().is_empty() => {
                warn!("No OpenAI-compatible API key configured - requests will fail until a key is set in Settings");
            }
            _ => {}
        }

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().starts_with(level))
        {
            warn!("Unusual log level '{}', the env filter may ignore it", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl LLMConfig {
    fn from_lookup(lookup: Lookup<'_>) -> Self {
        let default_api_key =
            non_empty(lookup("GEMINI_API_KEY")).or_else(|| non_empty(lookup("API_KEY")));

        let provider = match lookup("LLM_PROVIDER") {
            None => LLMProviderType::Gemini,
            Some(value) => LLMProviderType::from_config_str(&value).unwrap_or_else(|| {
                info!("Unknown LLM provider '{}', defaulting to Gemini", value);
                LLMProviderType::Gemini
            }),
        };

        LLMConfig {
            default_api_key,
            gemini_base_url: non_empty(lookup("GEMINI_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            gemini_model: non_empty(lookup("GEMINI_MODEL"))
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            provider,
            api_key: lookup("LLM_API_KEY").unwrap_or_default().trim().to_string(),
            base_url: non_empty(lookup("LLM_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            model: non_empty(lookup("LLM_MODEL"))
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            app_origin: non_empty(lookup("APP_ORIGIN"))
                .unwrap_or_else(|| DEFAULT_APP_ORIGIN.to_string()),
        }
    }

    /// Values resolved once at startup and passed into every provider call
    pub fn provider_defaults(&self) -> ProviderDefaults {
        ProviderDefaults {
            gemini_api_key: self.default_api_key.clone(),
            gemini_base_url: self.gemini_base_url.clone(),
            gemini_model: self.gemini_model.clone(),
            app_origin: self.app_origin.clone(),
        }
    }

    /// Settings the session starts with before anyone edits them
    pub fn initial_provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            provider: self.provider,
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
        }
    }
}

impl ServerConfig {
    fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let port_str = lookup("PORT").unwrap_or_else(|| "3000".to_string());

        let port = port_str.parse::<u16>()
            .map_err(|_| anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str))?;

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }
}

impl LoggingConfig {
    /// Logging is configured before everything else so the rest of startup is traced
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(lookup: Lookup<'_>) -> Self {
        let level = lookup("RUST_LOG").unwrap_or_else(|| "info,anki_refine=debug".to_string());

        let file_enabled = lookup("LOG_FILE_ENABLED")
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(true);

        let console_enabled = lookup("LOG_CONSOLE_ENABLED")
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(true);

        let log_directory = lookup("LOG_DIRECTORY").unwrap_or_else(|| "logs".to_string());

        LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        }
    }
}

/// Mask sensitive data for safe logging and display
pub fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}
