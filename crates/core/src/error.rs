use crate::import_run::{ImportRunStatus, RunAction};
use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cannot {action} import run in status '{current}'")]
    InvalidTransition {
        action: RunAction,
        current: ImportRunStatus,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
