//! Repository for the `sync_cursors` table.

use partsync_core::catalog::Cursor;
use sqlx::PgPool;

use crate::models::sync_cursor::SyncCursor;

const COLUMNS: &str = "id, entity_type, last_synced_at, last_id, records_processed, active, \
    created_at, updated_at";

/// Provides cursor persistence. At most one active cursor exists per
/// entity type (enforced by a partial unique index).
pub struct SyncCursorRepo;

impl SyncCursorRepo {
    /// The active cursor for an entity type.
    pub async fn find_active(
        pool: &PgPool,
        entity_type: &str,
    ) -> Result<Option<SyncCursor>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM sync_cursors WHERE entity_type = $1 AND active");
        sqlx::query_as::<_, SyncCursor>(&query)
            .bind(entity_type)
            .fetch_optional(pool)
            .await
    }

    /// Persist the cursor after a committed batch and add `processed` to the
    /// cumulative record count.
    pub async fn advance(
        pool: &PgPool,
        entity_type: &str,
        cursor: &Cursor,
        processed: i64,
    ) -> Result<SyncCursor, sqlx::Error> {
        let query = format!(
            "INSERT INTO sync_cursors (entity_type, last_synced_at, last_id, records_processed)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (entity_type) WHERE active DO UPDATE SET
                last_synced_at = EXCLUDED.last_synced_at,
                last_id = EXCLUDED.last_id,
                records_processed = sync_cursors.records_processed + EXCLUDED.records_processed,
                updated_at = NOW()
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SyncCursor>(&query)
            .bind(entity_type)
            .bind(cursor.since)
            .bind(cursor.last_id)
            .bind(processed)
            .fetch_one(pool)
            .await
    }

    /// Move the cursor back to `cursor` without touching the cumulative
    /// count.
    pub async fn reset(
        pool: &PgPool,
        entity_type: &str,
        cursor: &Cursor,
    ) -> Result<SyncCursor, sqlx::Error> {
        let query = format!(
            "INSERT INTO sync_cursors (entity_type, last_synced_at, last_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (entity_type) WHERE active DO UPDATE SET
                last_synced_at = EXCLUDED.last_synced_at,
                last_id = EXCLUDED.last_id,
                updated_at = NOW()
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SyncCursor>(&query)
            .bind(entity_type)
            .bind(cursor.since)
            .bind(cursor.last_id)
            .fetch_one(pool)
            .await
    }
}
