use thiserror::Error;

use crate::types::ActionState;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown action type: {0}")]
    UnknownActionType(String),

    #[error("Action {0} not found")]
    NotFound(String),

    #[error("Illegal transition for action {action_id}: {from:?} → {to:?}")]
    IllegalTransition {
        action_id: String,
        from: ActionState,
        to: ActionState,
    },

    #[error("Invalid 2FA code")]
    InvalidCode,

    #[error("Daily limit exceeded for {action_type}: {limit}")]
    LimitExceeded { action_type: String, limit: i64 },
}

impl From<ActionError> for miga_core::CoreError {
    fn from(e: ActionError) -> Self {
        match e {
            ActionError::Database(e) => miga_core::CoreError::StoreUnavailable(e.to_string()),
            ActionError::UnknownActionType(t) => {
                miga_core::CoreError::NotFound(format!("action type {t}"))
            }
            ActionError::NotFound(id) => miga_core::CoreError::NotFound(format!("action {id}")),
            ActionError::IllegalTransition { action_id, from, to } => {
                miga_core::CoreError::StateConflict(format!(
                    "action {action_id}: {from:?} → {to:?}"
                ))
            }
            ActionError::InvalidCode => miga_core::CoreError::Auth("invalid 2FA code".into()),
            ActionError::LimitExceeded { action_type, limit } => {
                miga_core::CoreError::LimitExceeded(format!("{action_type} (limit {limit}/day)"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ActionError>;
