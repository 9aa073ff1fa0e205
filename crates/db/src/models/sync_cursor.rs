//! Sync cursor rows.

use partsync_core::catalog::Cursor;
use partsync_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `sync_cursors` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SyncCursor {
    pub id: DbId,
    pub entity_type: String,
    pub last_synced_at: Timestamp,
    pub last_id: i64,
    pub records_processed: i64,
    pub active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SyncCursor {
    pub fn cursor(&self) -> Cursor {
        Cursor {
            since: self.last_synced_at,
            last_id: self.last_id,
        }
    }
}
