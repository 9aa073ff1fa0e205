//! Error types of the sync engine.

use partsync_core::error::CoreError;
use partsync_inventory::ClientError;

/// Failure of the persistence seam.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Non-SQL backend failure.
    #[error("Store error: {0}")]
    Backend(String),
}

/// Errors surfaced by the engine and the control service.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Reconciliation refused to run. Recorded as a warning on the run.
    #[error(
        "Reconciliation skipped: {missing} of {active} active parts ({percent:.1}%) are missing \
         upstream, above the {threshold_percent}% safety threshold"
    )]
    SafetyGuardTripped {
        missing: usize,
        active: usize,
        percent: f64,
        threshold_percent: f64,
    },

    #[error("Error ceiling reached: {0}")]
    ErrorCeiling(String),
}
