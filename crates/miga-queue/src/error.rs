use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is full")]
    Overflow,

    #[error("queue is closed")]
    Closed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<QueueError> for miga_core::CoreError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Overflow => miga_core::CoreError::QueueOverflow("queue is full".into()),
            QueueError::Closed => miga_core::CoreError::QueueOverflow("queue is closed".into()),
            QueueError::Database(e) => miga_core::CoreError::StoreUnavailable(e.to_string()),
        }
    }
}

/// Failure reported by a job handler. `retryable` drives the redelivery
/// decision; a non-retryable failure short-circuits to the dead letter.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub retryable: bool,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
