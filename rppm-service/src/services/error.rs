//! Translation of service-level failures into the shared `AppError`.

use crate::services::authenticator::AuthError;
use crate::services::credentials::StoreError;
use crate::services::gate::GateError;
use crate::services::lesson::DocumentError;
use crate::services::providers::ProviderError;
use service_core::error::AppError;

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            AuthError::InvalidCode => AppError::InvalidCode,
            AuthError::DeviceLocked => AppError::DeviceLocked,
            AuthError::ServerError(e) => e.into(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => AppError::DatabaseError(e),
        }
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Counter(e) => AppError::CacheError(anyhow::Error::new(e)),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            // A missing server key is our problem, not the upstream's.
            ProviderError::NotConfigured(msg) => {
                AppError::InternalError(anyhow::anyhow!("completion provider: {}", msg))
            }
            ProviderError::CallerKeyRejected => AppError::BadRequest(anyhow::anyhow!(
                "the supplied API key was rejected by the model provider"
            )),
            ProviderError::ContentFiltered => {
                AppError::BadGateway("the model declined to answer this request".to_string())
            }
            other => {
                tracing::warn!(error = %other, "Completion failed");
                AppError::BadGateway("the language model is unavailable, try again later".to_string())
            }
        }
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        tracing::warn!(error = %err, "Model reply could not be used");
        AppError::BadGateway("the language model returned an unusable document".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_keep_their_reason_codes() {
        assert_eq!(AppError::from(AuthError::InvalidCode).reason_code(), "INVALID_CODE");
        assert_eq!(AppError::from(AuthError::DeviceLocked).reason_code(), "DEVICE_LOCKED");
        assert_eq!(
            AppError::from(AuthError::InvalidInput("x".into())).reason_code(),
            "INVALID_INPUT"
        );
        assert_eq!(
            AppError::from(AuthError::ServerError(StoreError::Unavailable(anyhow::anyhow!(
                "down"
            ))))
            .reason_code(),
            "SERVER_ERROR"
        );
    }

    #[test]
    fn test_provider_errors_map_to_upstream() {
        let exhausted = ProviderError::Exhausted {
            primary: Box::new(ProviderError::RateLimited),
            fallback: Box::new(ProviderError::NetworkError("reset".into())),
        };
        assert_eq!(AppError::from(exhausted).reason_code(), "UPSTREAM_ERROR");
        assert_eq!(
            AppError::from(ProviderError::NotConfigured("no key".into())).reason_code(),
            "SERVER_ERROR"
        );
    }

    #[test]
    fn test_rejected_caller_key_is_the_callers_fault() {
        let err = AppError::from(ProviderError::CallerKeyRejected);
        assert_eq!(err.reason_code(), "INVALID_INPUT");
    }
}
