//! Text-completion providers and the primary/fallback invoker.

pub mod gemini;
pub mod invoker;
pub mod mock;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

pub use invoker::CompletionInvoker;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// The upstream refused a key supplied by the caller.
    #[error("Caller-supplied API key was rejected")]
    CallerKeyRejected,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Content filtered")]
    ContentFiltered,

    #[error("Empty response")]
    EmptyResponse,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("All models failed (primary: {primary}; fallback: {fallback})")]
    Exhausted {
        primary: Box<ProviderError>,
        fallback: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured(_) => "not_configured",
            ProviderError::CallerKeyRejected => "caller_key_rejected",
            ProviderError::ApiError(_) => "api_error",
            ProviderError::InvalidRequest(_) => "invalid_request",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::ContentFiltered => "content_filtered",
            ProviderError::EmptyResponse => "empty_response",
            ProviderError::NetworkError(_) => "network_error",
            ProviderError::Exhausted { .. } => "exhausted",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<i32>,
    /// Ask the model for a JSON response body.
    pub json_response: bool,
    /// Caller-supplied upstream key, used instead of the server key.
    pub api_key_override: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub options: CompletionOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError>;
}
