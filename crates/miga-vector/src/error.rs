use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Embedding unavailable for '{0}'")]
    EmbeddingUnavailable(String),
}

impl From<VectorError> for miga_core::CoreError {
    fn from(e: VectorError) -> Self {
        match e {
            VectorError::Database(e) => miga_core::CoreError::StoreUnavailable(e.to_string()),
            VectorError::EmbeddingUnavailable(what) => {
                miga_core::CoreError::EmbeddingUnavailable(what)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, VectorError>;
