use thiserror::Error;

/// Error kinds shared across the platform. Subsystem crates define their own
/// error enums and convert into `CoreError` at component boundaries so the
/// gateway and the queue can classify failures uniformly.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Queue overflow: {0}")]
    QueueOverflow(String),

    #[error("Upstream timeout after {ms}ms: {what}")]
    UpstreamTimeout { what: String, ms: u64 },

    #[error("Upstream rate limited, retry after {retry_after_ms}ms")]
    UpstreamRateLimited { retry_after_ms: u64 },

    #[error("Provider rejected parameter '{parameter}' for model {model}")]
    ProviderParameterUnsupported { model: String, parameter: String },

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Schema mismatch for '{schema}': {detail}")]
    SchemaMismatch { schema: String, detail: String },

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Short error code string surfaced in HTTP error bodies and job records.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Auth(_) => "AUTH_ERROR",
            CoreError::QueueOverflow(_) => "QUEUE_OVERFLOW",
            CoreError::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            CoreError::UpstreamRateLimited { .. } => "UPSTREAM_RATE_LIMITED",
            CoreError::ProviderParameterUnsupported { .. } => "PROVIDER_PARAMETER_UNSUPPORTED",
            CoreError::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
            CoreError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            CoreError::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            CoreError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::StateConflict(_) => "STATE_CONFLICT",
            CoreError::Cancelled => "CANCELLED",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the queue/executor should retry a job that failed with this error.
    /// Auth, limit, and state errors never become retryable by waiting.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CoreError::UpstreamTimeout { .. }
                | CoreError::UpstreamRateLimited { .. }
                | CoreError::StoreUnavailable(_)
                | CoreError::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::Auth("x".into()).code(), "AUTH_ERROR");
        assert_eq!(CoreError::QueueOverflow("full".into()).code(), "QUEUE_OVERFLOW");
        assert_eq!(
            CoreError::ProviderParameterUnsupported {
                model: "m".into(),
                parameter: "temperature".into()
            }
            .code(),
            "PROVIDER_PARAMETER_UNSUPPORTED"
        );
    }

    #[test]
    fn retry_classification() {
        assert!(CoreError::UpstreamTimeout { what: "llm".into(), ms: 30_000 }.retryable());
        assert!(CoreError::StoreUnavailable("db down".into()).retryable());
        assert!(!CoreError::Auth("bad sig".into()).retryable());
        assert!(!CoreError::LimitExceeded("daily cap".into()).retryable());
    }
}
