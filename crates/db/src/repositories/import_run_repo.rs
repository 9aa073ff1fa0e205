//! Repository for the `import_runs` table.

use partsync_core::import_run::ImportRunStatus;
use partsync_core::types::DbId;
use sqlx::PgPool;

use crate::models::import_run::{CreateImportRun, ImportRun, RunProgress};

/// Column list for import_runs queries.
const COLUMNS: &str = "id, entity_type, run_mode, status, progress, total_items, \
    processed_items, new_items, updated_items, skipped_items, pending_items, \
    deactivated_items, error_count, errors, from_date, details, started_at, finished_at, \
    created_at, updated_at";

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn names(statuses: &[ImportRunStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Provides persistence for import runs.
///
/// Status changes are compare-and-set on the `status` column so operator
/// actions never overwrite counters written by the running import.
pub struct ImportRunRepo;

impl ImportRunRepo {
    /// Create a run in `pending` status.
    pub async fn create(pool: &PgPool, input: &CreateImportRun) -> Result<ImportRun, sqlx::Error> {
        let query = format!(
            "INSERT INTO import_runs (entity_type, run_mode, status, from_date, details)
             VALUES ($1, $2, 'pending', $3, $4)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(&input.entity_type)
            .bind(&input.run_mode)
            .bind(input.from_date)
            .bind(&input.details)
            .fetch_one(pool)
            .await
    }

    /// Find a run by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ImportRun>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM import_runs WHERE id = $1");
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Most recent non-terminal run for any of `entity_types`.
    pub async fn find_open(
        pool: &PgPool,
        entity_types: &[&str],
    ) -> Result<Option<ImportRun>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM import_runs
             WHERE entity_type = ANY($1) AND status = ANY($2)
             ORDER BY id DESC
             LIMIT 1"
        );
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(owned(entity_types))
            .bind(owned(ImportRunStatus::ACTIVE))
            .fetch_optional(pool)
            .await
    }

    /// Runs in any of `statuses`, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        statuses: &[ImportRunStatus],
    ) -> Result<Vec<ImportRun>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM import_runs WHERE status = ANY($1) ORDER BY id"
        );
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(names(statuses))
            .fetch_all(pool)
            .await
    }

    /// Move a run to `to` if its current status is one of `from`.
    ///
    /// Only `status`, `finished_at` and `updated_at` are written. Returns
    /// `None` when the row does not exist or its status did not match.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        from: &[ImportRunStatus],
        to: ImportRunStatus,
    ) -> Result<Option<ImportRun>, sqlx::Error> {
        let query = format!(
            "UPDATE import_runs SET
                status = $2,
                finished_at = CASE WHEN $3 THEN NOW() ELSE finished_at END,
                updated_at = NOW()
             WHERE id = $1 AND status = ANY($4)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(id)
            .bind(to.as_str())
            .bind(to.is_terminal())
            .bind(names(from))
            .fetch_optional(pool)
            .await
    }

    /// Write counters, error list and details while the run is still open.
    pub async fn update_progress(
        pool: &PgPool,
        id: DbId,
        progress: &RunProgress,
    ) -> Result<Option<ImportRun>, sqlx::Error> {
        let query = format!(
            "UPDATE import_runs SET
                progress = $2,
                total_items = $3,
                processed_items = $4,
                new_items = $5,
                updated_items = $6,
                skipped_items = $7,
                pending_items = $8,
                deactivated_items = $9,
                error_count = $10,
                errors = $11,
                details = $12,
                updated_at = NOW()
             WHERE id = $1 AND status = ANY($13)
             RETURNING {COLUMNS}"
        );
        let c = &progress.counts;
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(id)
            .bind(c.progress_percent())
            .bind(to_i64(c.total))
            .bind(to_i64(c.processed))
            .bind(to_i64(c.inserted))
            .bind(to_i64(c.updated))
            .bind(to_i64(c.skipped))
            .bind(to_i64(c.pending))
            .bind(to_i64(c.deactivated))
            .bind(to_i64(c.errors))
            .bind(&progress.errors)
            .bind(&progress.details)
            .bind(owned(ImportRunStatus::ACTIVE))
            .fetch_optional(pool)
            .await
    }

    /// Write the final snapshot and terminal status in one statement, if
    /// the run is still in one of `from`.
    pub async fn finish(
        pool: &PgPool,
        id: DbId,
        from: &[ImportRunStatus],
        status: ImportRunStatus,
        progress: &RunProgress,
    ) -> Result<Option<ImportRun>, sqlx::Error> {
        let query = format!(
            "UPDATE import_runs SET
                status = $2,
                progress = CASE WHEN $2 IN ('completed', 'partial') THEN 100 ELSE $3 END,
                total_items = $4,
                processed_items = $5,
                new_items = $6,
                updated_items = $7,
                skipped_items = $8,
                pending_items = $9,
                deactivated_items = $10,
                error_count = $11,
                errors = $12,
                details = $13,
                finished_at = NOW(),
                updated_at = NOW()
             WHERE id = $1 AND status = ANY($14)
             RETURNING {COLUMNS}"
        );
        let c = &progress.counts;
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(id)
            .bind(status.as_str())
            .bind(c.progress_percent())
            .bind(to_i64(c.total))
            .bind(to_i64(c.processed))
            .bind(to_i64(c.inserted))
            .bind(to_i64(c.updated))
            .bind(to_i64(c.skipped))
            .bind(to_i64(c.pending))
            .bind(to_i64(c.deactivated))
            .bind(to_i64(c.errors))
            .bind(&progress.errors)
            .bind(&progress.details)
            .bind(names(from))
            .fetch_optional(pool)
            .await
    }

    /// Newest-first history, optionally filtered by entity type.
    pub async fn list_history(
        pool: &PgPool,
        entity_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImportRun>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM import_runs
             WHERE ($1::TEXT IS NULL OR entity_type = $1)
             ORDER BY started_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, ImportRun>(&query)
            .bind(entity_type)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
