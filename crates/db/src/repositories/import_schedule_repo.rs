//! Repository for the `import_schedules` table.

use partsync_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::import_schedule::{ImportSchedule, UpsertImportSchedule};

const COLUMNS: &str = "id, entity_type, frequency, full_import, active, last_run_at, \
    next_run_at, created_at, updated_at";

/// Provides persistence for recurring import schedules.
pub struct ImportScheduleRepo;

impl ImportScheduleRepo {
    /// All schedules ordered by entity type.
    pub async fn list(pool: &PgPool) -> Result<Vec<ImportSchedule>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM import_schedules ORDER BY entity_type");
        sqlx::query_as::<_, ImportSchedule>(&query)
            .fetch_all(pool)
            .await
    }

    /// Active schedules whose next run is due at `now` (or never computed).
    pub async fn list_due(
        pool: &PgPool,
        now: Timestamp,
    ) -> Result<Vec<ImportSchedule>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM import_schedules
             WHERE active AND (next_run_at IS NULL OR next_run_at <= $1)
             ORDER BY id"
        );
        sqlx::query_as::<_, ImportSchedule>(&query)
            .bind(now)
            .fetch_all(pool)
            .await
    }

    /// Create or replace the schedule for an entity type.
    pub async fn upsert(
        pool: &PgPool,
        input: &UpsertImportSchedule,
        next_run_at: Timestamp,
    ) -> Result<ImportSchedule, sqlx::Error> {
        let query = format!(
            "INSERT INTO import_schedules (entity_type, frequency, full_import, active, next_run_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (entity_type) DO UPDATE SET
                frequency = EXCLUDED.frequency,
                full_import = EXCLUDED.full_import,
                active = EXCLUDED.active,
                next_run_at = EXCLUDED.next_run_at,
                updated_at = NOW()
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportSchedule>(&query)
            .bind(&input.entity_type)
            .bind(&input.frequency)
            .bind(input.full_import)
            .bind(input.active)
            .bind(next_run_at)
            .fetch_one(pool)
            .await
    }

    /// Insert a schedule only if the entity type has none. Returns whether a
    /// row was created.
    pub async fn insert_if_missing(
        pool: &PgPool,
        input: &UpsertImportSchedule,
        next_run_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO import_schedules (entity_type, frequency, full_import, active, next_run_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (entity_type) DO NOTHING",
        )
        .bind(&input.entity_type)
        .bind(&input.frequency)
        .bind(input.full_import)
        .bind(input.active)
        .bind(next_run_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record that a schedule fired and when it fires next.
    pub async fn mark_run(
        pool: &PgPool,
        id: DbId,
        last_run_at: Timestamp,
        next_run_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE import_schedules SET last_run_at = $2, next_run_at = $3, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}
