pub mod api;
pub mod config;
pub mod controller;
pub mod errors;
pub mod llm_providers;
pub mod llm_service;
pub mod logging;
pub mod models;
pub mod settings;

pub use controller::{AnalysisController, CardAnalyzer, RequestLifecycleState, SubmitOutcome};
pub use errors::*;
pub use llm_providers::{JsonResponseParser, LLMProvider, LLMProviderFactory, LLMProviderType, ProviderDefaults};
pub use llm_service::LLMService;
pub use models::*;
pub use settings::{SettingsStore, SettingsUpdate};
