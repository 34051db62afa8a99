use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Fact not found for contact {contact_id}: {key}")]
    FactNotFound { contact_id: i64, key: String },
}

impl From<MemoryError> for miga_core::CoreError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::Database(e) => miga_core::CoreError::StoreUnavailable(e.to_string()),
            MemoryError::FactNotFound { contact_id, key } => {
                miga_core::CoreError::NotFound(format!("fact {key} for contact {contact_id}"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
