//! Operator-facing control surface for import runs.
//!
//! Status changes requested here touch the status column only, through a
//! compare-and-set, so they never clobber counters written by the runner.

use std::sync::Arc;

use partsync_core::catalog::{Cursor, EntityType, RunMode};
use partsync_core::error::CoreError;
use partsync_core::import_run::{self, ImportRunStatus, RunAction};
use partsync_core::search::{clamp_limit, page_offset, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use partsync_core::types::{DbId, Timestamp};
use partsync_db::models::import_run::{CreateImportRun, ImportRun};
use tokio::sync::Mutex;

use crate::error::SyncError;
use crate::store::CatalogStore;
use crate::worker::RunQueue;

pub struct ImportService {
    store: Arc<dyn CatalogStore>,
    queue: RunQueue,
    /// Serializes the conflict check and the insert of a new run.
    start_lock: Mutex<()>,
}

impl ImportService {
    pub fn new(store: Arc<dyn CatalogStore>, queue: RunQueue) -> Self {
        Self {
            store,
            queue,
            start_lock: Mutex::new(()),
        }
    }

    /// Create a run and queue it. Returns as soon as the run is queued.
    ///
    /// A full start rewinds the cursor to the base date; a start with
    /// `from_date` rewinds it to that date; otherwise the stored cursor is
    /// kept. Rejected with [`CoreError::Conflict`] while a run of an
    /// overlapping entity type is still open.
    pub async fn start_import(
        &self,
        entity: EntityType,
        from_date: Option<Timestamp>,
        full: bool,
    ) -> Result<DbId, SyncError> {
        let _guard = self.start_lock.lock().await;

        if let Some(open) = self.store.find_open_run(entity.overlapping()).await? {
            return Err(CoreError::Conflict(format!(
                "Import run {} ({}) is still {}",
                open.id, open.entity_type, open.status
            ))
            .into());
        }

        let reset = if full {
            Some(Cursor::base())
        } else {
            from_date.map(Cursor::from_date)
        };
        if let Some(cursor) = reset {
            for target in cursor_entities(entity) {
                self.store.reset_cursor(*target, &cursor).await?;
            }
        }

        let mode = RunMode::from_full_flag(full);
        let run = self
            .store
            .create_run(&CreateImportRun {
                entity_type: entity.as_str().to_string(),
                run_mode: mode.as_str().to_string(),
                from_date,
                details: serde_json::json!({}),
            })
            .await?;

        tracing::info!(run_id = run.id, entity_type = %entity, run_mode = %mode, "Import run created");
        if !self.queue.submit(run.id) {
            tracing::warn!(run_id = run.id, "Import worker is not running, run stays pending");
        }
        Ok(run.id)
    }

    pub async fn get_run_status(&self, run_id: DbId) -> Result<ImportRun, SyncError> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| not_found(run_id))
    }

    pub async fn pause(&self, run_id: DbId) -> Result<ImportRun, SyncError> {
        self.apply(run_id, RunAction::Pause).await
    }

    /// Resume a paused run from its persisted cursor.
    pub async fn resume(&self, run_id: DbId) -> Result<ImportRun, SyncError> {
        let run = self.apply(run_id, RunAction::Resume).await?;
        if !self.queue.submit(run_id) {
            tracing::warn!(run_id, "Import worker is not running, resumed run not queued");
        }
        Ok(run)
    }

    pub async fn cancel(&self, run_id: DbId) -> Result<ImportRun, SyncError> {
        self.apply(run_id, RunAction::Cancel).await
    }

    /// Newest runs first, optionally restricted to one entity type.
    pub async fn list_history(
        &self,
        entity: Option<EntityType>,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> Result<Vec<ImportRun>, SyncError> {
        let limit = clamp_limit(page_size, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
        let offset = page_offset(page, limit);
        Ok(self
            .store
            .run_history(entity.map(|e| e.as_str()), limit, offset)
            .await?)
    }

    /// Queue every run a previous process left unfinished. Returns how many
    /// were queued.
    pub async fn recover_interrupted_runs(&self) -> Result<usize, SyncError> {
        let runs = self
            .store
            .runs_with_status(&[ImportRunStatus::InProgress, ImportRunStatus::Pending])
            .await?;
        for run in &runs {
            tracing::info!(
                run_id = run.id,
                entity_type = %run.entity_type,
                status = %run.status,
                "Recovering interrupted import run",
            );
            self.queue.submit(run.id);
        }
        Ok(runs.len())
    }

    async fn apply(&self, run_id: DbId, action: RunAction) -> Result<ImportRun, SyncError> {
        let current = self.get_run_status(run_id).await?.status();
        import_run::transition(current, action)?;

        match self
            .store
            .transition_run(run_id, action.allowed_from(), action.target())
            .await?
        {
            Some(run) => {
                tracing::info!(run_id, action = %action, status = %run.status, "Import run transitioned");
                Ok(run)
            }
            None => {
                // Lost a race with the runner or another operator.
                let current = self.get_run_status(run_id).await?.status();
                Err(CoreError::InvalidTransition { action, current }.into())
            }
        }
    }
}

fn cursor_entities(entity: EntityType) -> &'static [EntityType] {
    match entity {
        EntityType::Vehicles => &[EntityType::Vehicles],
        EntityType::Parts => &[EntityType::Parts],
        EntityType::Catalog => &[EntityType::Vehicles, EntityType::Parts],
    }
}

fn not_found(run_id: DbId) -> SyncError {
    CoreError::NotFound {
        entity: "import_run",
        id: run_id,
    }
    .into()
}
