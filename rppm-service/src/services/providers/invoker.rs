use super::{Completion, CompletionOptions, CompletionProvider, CompletionRequest, ProviderError};
use crate::services::metrics;
use std::sync::Arc;
use std::time::Instant;

/// Tries the primary model, then exactly one fallback model.
///
/// Total wall-clock time is bounded by the caller (the admission gate), not
/// here.
#[derive(Clone)]
pub struct CompletionInvoker {
    provider: Arc<dyn CompletionProvider>,
    primary_model: String,
    fallback_model: Option<String>,
}

impl CompletionInvoker {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        primary_model: impl Into<String>,
        fallback_model: Option<String>,
    ) -> Self {
        Self {
            provider,
            primary_model: primary_model.into(),
            fallback_model,
        }
    }

    pub fn provider(&self) -> &Arc<dyn CompletionProvider> {
        &self.provider
    }

    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let request = CompletionRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            options,
        };

        let primary_err = match self.attempt(&self.primary_model, &request).await {
            Ok(completion) => return Ok(completion),
            // The same key would be refused by the fallback model too.
            Err(e @ ProviderError::CallerKeyRejected) => return Err(e),
            Err(e) => e,
        };

        let Some(fallback_model) = &self.fallback_model else {
            return Err(primary_err);
        };

        tracing::warn!(
            primary = %self.primary_model,
            fallback = %fallback_model,
            error = %primary_err,
            "Primary model failed, trying fallback"
        );

        self.attempt(fallback_model, &request)
            .await
            .map_err(|fallback_err| match fallback_err {
                ProviderError::CallerKeyRejected => fallback_err,
                fallback_err => ProviderError::Exhausted {
                    primary: Box::new(primary_err),
                    fallback: Box::new(fallback_err),
                },
            })
    }

    async fn attempt(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let started = Instant::now();
        let result = self.provider.complete(model, request).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(completion) => {
                metrics::record_provider_latency(self.provider.name(), model, elapsed);
                metrics::record_tokens(model, completion.input_tokens, completion.output_tokens);
            }
            Err(e) => metrics::record_provider_error(self.provider.name(), e.kind()),
        }
        result
    }
}
