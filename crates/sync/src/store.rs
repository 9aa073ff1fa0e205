//! Persistence seam of the sync engine.
//!
//! [`CatalogStore`] is everything the engine needs from the database.
//! [`PgCatalogStore`] delegates to the `partsync-db` repositories; engine
//! tests run against an in-memory implementation.

use async_trait::async_trait;
use partsync_core::catalog::{Cursor, EntityType, NormalizedPart, NormalizedVehicle};
use partsync_core::import_run::ImportRunStatus;
use partsync_core::types::{DbId, Timestamp};
use partsync_db::models::import_run::{CreateImportRun, ImportRun, RunProgress};
use partsync_db::models::import_schedule::{ImportSchedule, UpsertImportSchedule};
use partsync_db::models::part::PendingPart;
use partsync_db::models::vehicle::VehicleSummary;
use partsync_db::models::vehicle_part::ResolvedLink;
use partsync_db::repositories::part_repo::UpsertedPart;
use partsync_db::repositories::vehicle_repo::UpsertedVehicle;
use partsync_db::repositories::{
    ImportRunRepo, ImportScheduleRepo, PartRepo, SyncCursorRepo, VehiclePartRepo, VehicleRepo,
};
use partsync_db::DbPool;

use crate::error::StoreError;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    // -- Cursors -------------------------------------------------------------

    async fn load_cursor(&self, entity: EntityType) -> Result<Option<Cursor>, StoreError>;

    /// Persist the cursor after a committed batch of `processed` records.
    async fn save_cursor(
        &self,
        entity: EntityType,
        cursor: &Cursor,
        processed: u64,
    ) -> Result<(), StoreError>;

    async fn reset_cursor(&self, entity: EntityType, cursor: &Cursor) -> Result<(), StoreError>;

    // -- Import runs ---------------------------------------------------------

    async fn create_run(&self, input: &CreateImportRun) -> Result<ImportRun, StoreError>;

    async fn get_run(&self, id: DbId) -> Result<Option<ImportRun>, StoreError>;

    /// Newest non-terminal run whose entity type is one of `entity_types`.
    async fn find_open_run(&self, entity_types: &[&str]) -> Result<Option<ImportRun>, StoreError>;

    async fn runs_with_status(
        &self,
        statuses: &[ImportRunStatus],
    ) -> Result<Vec<ImportRun>, StoreError>;

    /// Status-only compare-and-set. `None` when the status did not match.
    async fn transition_run(
        &self,
        id: DbId,
        from: &[ImportRunStatus],
        to: ImportRunStatus,
    ) -> Result<Option<ImportRun>, StoreError>;

    /// Write counters while the run is open. `None` once it is terminal.
    async fn update_run_progress(
        &self,
        id: DbId,
        progress: &RunProgress,
    ) -> Result<Option<ImportRun>, StoreError>;

    async fn finish_run(
        &self,
        id: DbId,
        from: &[ImportRunStatus],
        status: ImportRunStatus,
        progress: &RunProgress,
    ) -> Result<Option<ImportRun>, StoreError>;

    async fn run_history(
        &self,
        entity_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImportRun>, StoreError>;

    // -- Vehicles ------------------------------------------------------------

    async fn count_vehicles(&self) -> Result<i64, StoreError>;

    async fn existing_vehicle_ids(&self, external_ids: &[i64]) -> Result<Vec<i64>, StoreError>;

    async fn vehicle_summaries(
        &self,
        external_ids: &[i64],
    ) -> Result<Vec<VehicleSummary>, StoreError>;

    async fn upsert_vehicles(
        &self,
        vehicles: &[NormalizedVehicle],
    ) -> Result<Vec<UpsertedVehicle>, StoreError>;

    async fn insert_vehicle(&self, vehicle: &NormalizedVehicle) -> Result<(), StoreError>;

    async fn update_vehicle(&self, vehicle: &NormalizedVehicle) -> Result<bool, StoreError>;

    async fn touch_vehicles(&self, external_ids: &[i64]) -> Result<u64, StoreError>;

    async fn recompute_part_counters(&self) -> Result<u64, StoreError>;

    // -- Parts ---------------------------------------------------------------

    async fn count_parts(&self, company_id: i64) -> Result<i64, StoreError>;

    async fn existing_part_refs(&self, company_id: i64, refs: &[i64])
        -> Result<Vec<i64>, StoreError>;

    async fn upsert_parts(&self, parts: &[NormalizedPart]) -> Result<Vec<UpsertedPart>, StoreError>;

    async fn insert_part(&self, part: &NormalizedPart) -> Result<(), StoreError>;

    async fn update_part(&self, part: &NormalizedPart) -> Result<bool, StoreError>;

    async fn touch_parts(&self, company_id: i64, refs: &[i64]) -> Result<u64, StoreError>;

    /// Link parts whose vehicle already exists.
    async fn link_parts(&self, company_id: i64, refs: &[i64]) -> Result<u64, StoreError>;

    /// Drop stale associations of parts that are pending again.
    async fn unlink_pending_parts(&self, company_id: i64, refs: &[i64])
        -> Result<u64, StoreError>;

    async fn pending_parts(&self, after_id: DbId, limit: i64)
        -> Result<Vec<PendingPart>, StoreError>;

    async fn resolve_links(&self, links: &[ResolvedLink]) -> Result<u64, StoreError>;

    async fn active_available_refs(&self, company_id: i64) -> Result<Vec<i64>, StoreError>;

    async fn mark_unavailable(&self, company_id: i64, refs: &[i64]) -> Result<u64, StoreError>;

    // -- Schedules -----------------------------------------------------------

    async fn due_schedules(&self, now: Timestamp) -> Result<Vec<ImportSchedule>, StoreError>;

    async fn mark_schedule_run(
        &self,
        id: DbId,
        last_run_at: Timestamp,
        next_run_at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Create the schedule unless one exists for its entity type.
    async fn seed_schedule(
        &self,
        input: &UpsertImportSchedule,
        next_run_at: Timestamp,
    ) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`CatalogStore`] backed by the PostgreSQL repositories.
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: DbPool,
}

impl PgCatalogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn count_arg(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn load_cursor(&self, entity: EntityType) -> Result<Option<Cursor>, StoreError> {
        let row = SyncCursorRepo::find_active(&self.pool, entity.as_str()).await?;
        Ok(row.map(|c| c.cursor()))
    }

    async fn save_cursor(
        &self,
        entity: EntityType,
        cursor: &Cursor,
        processed: u64,
    ) -> Result<(), StoreError> {
        SyncCursorRepo::advance(&self.pool, entity.as_str(), cursor, count_arg(processed)).await?;
        Ok(())
    }

    async fn reset_cursor(&self, entity: EntityType, cursor: &Cursor) -> Result<(), StoreError> {
        SyncCursorRepo::reset(&self.pool, entity.as_str(), cursor).await?;
        Ok(())
    }

    async fn create_run(&self, input: &CreateImportRun) -> Result<ImportRun, StoreError> {
        Ok(ImportRunRepo::create(&self.pool, input).await?)
    }

    async fn get_run(&self, id: DbId) -> Result<Option<ImportRun>, StoreError> {
        Ok(ImportRunRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_open_run(&self, entity_types: &[&str]) -> Result<Option<ImportRun>, StoreError> {
        Ok(ImportRunRepo::find_open(&self.pool, entity_types).await?)
    }

    async fn runs_with_status(
        &self,
        statuses: &[ImportRunStatus],
    ) -> Result<Vec<ImportRun>, StoreError> {
        Ok(ImportRunRepo::list_by_status(&self.pool, statuses).await?)
    }

    async fn transition_run(
        &self,
        id: DbId,
        from: &[ImportRunStatus],
        to: ImportRunStatus,
    ) -> Result<Option<ImportRun>, StoreError> {
        Ok(ImportRunRepo::transition(&self.pool, id, from, to).await?)
    }

    async fn update_run_progress(
        &self,
        id: DbId,
        progress: &RunProgress,
    ) -> Result<Option<ImportRun>, StoreError> {
        Ok(ImportRunRepo::update_progress(&self.pool, id, progress).await?)
    }

    async fn finish_run(
        &self,
        id: DbId,
        from: &[ImportRunStatus],
        status: ImportRunStatus,
        progress: &RunProgress,
    ) -> Result<Option<ImportRun>, StoreError> {
        Ok(ImportRunRepo::finish(&self.pool, id, from, status, progress).await?)
    }

    async fn run_history(
        &self,
        entity_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImportRun>, StoreError> {
        Ok(ImportRunRepo::list_history(&self.pool, entity_type, limit, offset).await?)
    }

    async fn count_vehicles(&self) -> Result<i64, StoreError> {
        Ok(VehicleRepo::count(&self.pool).await?)
    }

    async fn existing_vehicle_ids(&self, external_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        Ok(VehicleRepo::existing_external_ids(&self.pool, external_ids).await?)
    }

    async fn vehicle_summaries(
        &self,
        external_ids: &[i64],
    ) -> Result<Vec<VehicleSummary>, StoreError> {
        Ok(VehicleRepo::find_summaries(&self.pool, external_ids).await?)
    }

    async fn upsert_vehicles(
        &self,
        vehicles: &[NormalizedVehicle],
    ) -> Result<Vec<UpsertedVehicle>, StoreError> {
        Ok(VehicleRepo::upsert_batch(&self.pool, vehicles).await?)
    }

    async fn insert_vehicle(&self, vehicle: &NormalizedVehicle) -> Result<(), StoreError> {
        VehicleRepo::insert(&self.pool, vehicle).await?;
        Ok(())
    }

    async fn update_vehicle(&self, vehicle: &NormalizedVehicle) -> Result<bool, StoreError> {
        Ok(VehicleRepo::update(&self.pool, vehicle).await?)
    }

    async fn touch_vehicles(&self, external_ids: &[i64]) -> Result<u64, StoreError> {
        Ok(VehicleRepo::touch_synced(&self.pool, external_ids).await?)
    }

    async fn recompute_part_counters(&self) -> Result<u64, StoreError> {
        Ok(VehicleRepo::recompute_part_counters(&self.pool).await?)
    }

    async fn count_parts(&self, company_id: i64) -> Result<i64, StoreError> {
        Ok(PartRepo::count(&self.pool, company_id).await?)
    }

    async fn existing_part_refs(
        &self,
        company_id: i64,
        refs: &[i64],
    ) -> Result<Vec<i64>, StoreError> {
        Ok(PartRepo::existing_refs(&self.pool, company_id, refs).await?)
    }

    async fn upsert_parts(&self, parts: &[NormalizedPart]) -> Result<Vec<UpsertedPart>, StoreError> {
        Ok(PartRepo::upsert_batch(&self.pool, parts).await?)
    }

    async fn insert_part(&self, part: &NormalizedPart) -> Result<(), StoreError> {
        PartRepo::insert(&self.pool, part).await?;
        Ok(())
    }

    async fn update_part(&self, part: &NormalizedPart) -> Result<bool, StoreError> {
        Ok(PartRepo::update(&self.pool, part).await?)
    }

    async fn touch_parts(&self, company_id: i64, refs: &[i64]) -> Result<u64, StoreError> {
        Ok(PartRepo::touch_confirmed(&self.pool, company_id, refs).await?)
    }

    async fn link_parts(&self, company_id: i64, refs: &[i64]) -> Result<u64, StoreError> {
        Ok(VehiclePartRepo::link_existing(&self.pool, company_id, refs).await?)
    }

    async fn unlink_pending_parts(
        &self,
        company_id: i64,
        refs: &[i64],
    ) -> Result<u64, StoreError> {
        Ok(VehiclePartRepo::unlink_pending(&self.pool, company_id, refs).await?)
    }

    async fn pending_parts(
        &self,
        after_id: DbId,
        limit: i64,
    ) -> Result<Vec<PendingPart>, StoreError> {
        Ok(PartRepo::list_pending(&self.pool, after_id, limit).await?)
    }

    async fn resolve_links(&self, links: &[ResolvedLink]) -> Result<u64, StoreError> {
        Ok(VehiclePartRepo::resolve_batch(&self.pool, links).await?)
    }

    async fn active_available_refs(&self, company_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(PartRepo::active_available_refs(&self.pool, company_id).await?)
    }

    async fn mark_unavailable(&self, company_id: i64, refs: &[i64]) -> Result<u64, StoreError> {
        Ok(PartRepo::mark_unavailable(&self.pool, company_id, refs).await?)
    }

    async fn due_schedules(&self, now: Timestamp) -> Result<Vec<ImportSchedule>, StoreError> {
        Ok(ImportScheduleRepo::list_due(&self.pool, now).await?)
    }

    async fn mark_schedule_run(
        &self,
        id: DbId,
        last_run_at: Timestamp,
        next_run_at: Timestamp,
    ) -> Result<(), StoreError> {
        Ok(ImportScheduleRepo::mark_run(&self.pool, id, last_run_at, next_run_at).await?)
    }

    async fn seed_schedule(
        &self,
        input: &UpsertImportSchedule,
        next_run_at: Timestamp,
    ) -> Result<bool, StoreError> {
        Ok(ImportScheduleRepo::insert_if_missing(&self.pool, input, next_run_at).await?)
    }
}
