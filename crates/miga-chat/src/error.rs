use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chat provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Chat provider not configured: {0}")]
    NotConfigured(String),
}

impl ChatError {
    /// Retry only transport and 5xx failures; 4xx means the request itself
    /// is wrong and will not improve on retry.
    pub fn retryable(&self) -> bool {
        match self {
            ChatError::Http(_) => true,
            ChatError::Api { status, .. } => *status >= 500 || *status == 429,
            ChatError::NotConfigured(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
