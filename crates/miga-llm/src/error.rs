use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Model refused the request: {0}")]
    Refusal(String),

    #[error("Structured output did not match schema '{schema}': {detail}")]
    SchemaMismatch { schema: String, detail: String },

    #[error("LLM not configured: {0}")]
    NotConfigured(String),

    #[error("Model knowledge store error: {0}")]
    Store(String),
}

impl From<LlmError> for miga_core::CoreError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout { ms } => miga_core::CoreError::UpstreamTimeout {
                what: "llm".to_string(),
                ms,
            },
            LlmError::RateLimited { retry_after_ms } => {
                miga_core::CoreError::UpstreamRateLimited { retry_after_ms }
            }
            LlmError::SchemaMismatch { schema, detail } => {
                miga_core::CoreError::SchemaMismatch { schema, detail }
            }
            other => miga_core::CoreError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
