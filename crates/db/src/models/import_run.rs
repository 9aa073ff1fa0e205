//! Import run rows.

use partsync_core::import_run::{ImportRunStatus, RunCounts};
use partsync_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `import_runs` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ImportRun {
    pub id: DbId,
    pub entity_type: String,
    pub run_mode: String,
    pub status: String,
    pub progress: f64,
    pub total_items: i64,
    pub processed_items: i64,
    pub new_items: i64,
    pub updated_items: i64,
    pub skipped_items: i64,
    pub pending_items: i64,
    pub deactivated_items: i64,
    pub error_count: i64,
    pub errors: Vec<String>,
    pub from_date: Option<Timestamp>,
    pub details: serde_json::Value,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ImportRun {
    /// Parsed status. Unknown values read as `failed`.
    pub fn status(&self) -> ImportRunStatus {
        ImportRunStatus::from_str(&self.status).unwrap_or(ImportRunStatus::Failed)
    }

    /// Counters as stored.
    pub fn counts(&self) -> RunCounts {
        let n = |v: i64| u64::try_from(v).unwrap_or(0);
        RunCounts {
            total: n(self.total_items),
            processed: n(self.processed_items),
            inserted: n(self.new_items),
            updated: n(self.updated_items),
            skipped: n(self.skipped_items),
            pending: n(self.pending_items),
            deactivated: n(self.deactivated_items),
            errors: n(self.error_count),
        }
    }
}

/// DTO for creating a new import run.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateImportRun {
    pub entity_type: String,
    pub run_mode: String,
    pub from_date: Option<Timestamp>,
    pub details: serde_json::Value,
}

/// Progress snapshot written after every batch.
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub counts: RunCounts,
    pub errors: Vec<String>,
    pub details: serde_json::Value,
}
