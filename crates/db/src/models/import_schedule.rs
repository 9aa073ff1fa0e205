//! Import schedule rows.

use partsync_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `import_schedules` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ImportSchedule {
    pub id: DbId,
    pub entity_type: String,
    pub frequency: String,
    pub full_import: bool,
    pub active: bool,
    pub last_run_at: Option<Timestamp>,
    pub next_run_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating or replacing a schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertImportSchedule {
    pub entity_type: String,
    pub frequency: String,
    pub full_import: bool,
    pub active: bool,
}
