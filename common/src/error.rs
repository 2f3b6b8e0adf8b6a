use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Distinct causes for an external LLM/embedding provider failure. The API
/// layer maps these to 401, 429 and 502 respectively.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider rejected credentials: {0}")]
    Auth(String),
    #[error("provider rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("provider unreachable: {0}")]
    Unavailable(String),
    #[error("provider error: {0}")]
    Other(String),
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Illegal transition: {0}")]
    IllegalTransition(String),
    #[error("Inconsistent state: {0}")]
    Inconsistency(String),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Classify an `async-openai` failure into a provider cause. Auth and
    /// rate-limit problems surface through the HTTP status of the underlying
    /// request; everything without a response is a connectivity problem.
    pub fn from_provider_call(err: OpenAIError) -> Self {
        match &err {
            OpenAIError::Reqwest(inner) => match inner.status().map(|s| s.as_u16()) {
                Some(401) | Some(403) => {
                    Self::Provider(ProviderError::Auth(inner.to_string()))
                }
                Some(429) => Self::Provider(ProviderError::RateLimited(inner.to_string())),
                Some(_) => Self::Provider(ProviderError::Other(inner.to_string())),
                None => Self::Provider(ProviderError::Unavailable(inner.to_string())),
            },
            OpenAIError::ApiError(api) => {
                let kind = api.r#type.as_deref().unwrap_or_default();
                let message = api.message.to_ascii_lowercase();
                if kind.contains("authentication")
                    || message.contains("api key")
                    || message.contains("invalid_api_key")
                {
                    Self::Provider(ProviderError::Auth(api.message.clone()))
                } else if kind.contains("rate_limit") || message.contains("rate limit") {
                    Self::Provider(ProviderError::RateLimited(api.message.clone()))
                } else {
                    Self::Provider(ProviderError::Other(api.message.clone()))
                }
            }
            _ => Self::OpenAI(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_auth_type_maps_to_auth_cause() {
        let err = OpenAIError::ApiError(async_openai::error::ApiError {
            message: "Incorrect API key provided".into(),
            r#type: Some("invalid_authentication_error".into()),
            param: None,
            code: None,
        });

        match AppError::from_provider_call(err) {
            AppError::Provider(ProviderError::Auth(msg)) => {
                assert!(msg.contains("API key"));
            }
            other => panic!("expected auth cause, got {other:?}"),
        }
    }

    #[test]
    fn api_error_rate_limit_type_maps_to_rate_limited_cause() {
        let err = OpenAIError::ApiError(async_openai::error::ApiError {
            message: "slow down".into(),
            r#type: Some("rate_limit_exceeded".into()),
            param: None,
            code: None,
        });

        match AppError::from_provider_call(err) {
            AppError::Provider(ProviderError::RateLimited(_)) => {}
            other => panic!("expected rate-limit cause, got {other:?}"),
        }
    }

    #[test]
    fn unclassified_api_error_keeps_message() {
        let err = OpenAIError::ApiError(async_openai::error::ApiError {
            message: "model overloaded".into(),
            r#type: None,
            param: None,
            code: None,
        });

        match AppError::from_provider_call(err) {
            AppError::Provider(ProviderError::Other(msg)) => {
                assert_eq!(msg, "model overloaded");
            }
            other => panic!("expected other cause, got {other:?}"),
        }
    }
}
