//! Batch ingestion loop for one entity type.
//!
//! Pages are processed strictly in sequence: fetch, normalize, upsert,
//! persist the cursor, checkpoint the run. The run status is polled at the
//! top of every iteration so pause and cancel take effect between batches,
//! never in the middle of an upsert.

use std::collections::HashSet;
use std::time::Duration;

use partsync_core::catalog::{Cursor, EntityType, RunMode};
use partsync_core::config::SyncConfig;
use partsync_core::envelope::{
    has_more, id_keys, latest_modification, next_cursor_id, record_id, RawPage,
};
use partsync_core::import_run::ImportRunStatus;
use partsync_core::normalize::{normalize_part, normalize_vehicle, NormalizationError};
use partsync_core::types::DbId;
use partsync_inventory::CatalogSource;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, SyncError};
use crate::store::CatalogStore;
use crate::tracker::RunTracker;
use crate::upsert::{upsert_parts, upsert_vehicles, UpsertOutcome, VehicleIndex, VEHICLE_REF_KEYS};

/// How an ingestion pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Every page was consumed.
    Exhausted,
    /// The operator paused the run.
    Paused,
    /// The run was cancelled or finished elsewhere.
    Cancelled,
    /// The process is shutting down. The run stays `in_progress`.
    Interrupted,
    /// A fatal error or an error ceiling stopped the run.
    Failed(String),
}

pub struct Ingestor<'a> {
    store: &'a dyn CatalogStore,
    source: &'a dyn CatalogSource,
    config: &'a SyncConfig,
    shutdown: &'a CancellationToken,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        store: &'a dyn CatalogStore,
        source: &'a dyn CatalogSource,
        config: &'a SyncConfig,
        shutdown: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            source,
            config,
            shutdown,
        }
    }

    /// Ingest `entity` (vehicles or parts) from the stored cursor until the
    /// upstream runs dry or the run is interrupted.
    ///
    /// With `remote_refs`, every upstream id seen is collected into it.
    pub async fn run(
        &self,
        tracker: &mut RunTracker,
        entity: EntityType,
        mode: RunMode,
        mut remote_refs: Option<&mut HashSet<i64>>,
    ) -> Result<IngestOutcome, StoreError> {
        let run_id = tracker.run_id();
        let page_size = self.config.page_size;
        let skip_existing = mode == RunMode::Incremental
            && self.local_count(entity).await? > self.config.skip_existing_threshold(entity);

        let mut cursor = self
            .store
            .load_cursor(entity)
            .await?
            .unwrap_or_else(Cursor::base);
        let mut watermark = tracker
            .watermark(entity)
            .map_or(cursor.since, |w| w.max(cursor.since));
        let mut processed: u64 = 0;

        tracing::info!(
            run_id,
            entity_type = %entity,
            last_id = cursor.last_id,
            skip_existing,
            "Starting ingestion",
        );

        loop {
            if let Some(outcome) = self.interruption(run_id).await? {
                tracing::info!(run_id, entity_type = %entity, outcome = ?outcome, "Ingestion stopped");
                return Ok(outcome);
            }

            let page = match self.source.fetch_batch(entity, &cursor, page_size).await {
                Ok(page) => page,
                Err(e) if e.is_fatal() => {
                    tracing::error!(run_id, error = %e, "Inventory API unusable, stopping run");
                    tracker.record_error(e.to_string());
                    return Ok(IngestOutcome::Failed(e.to_string()));
                }
                Err(e) => {
                    let failed = tracker.record_batch_error(format!(
                        "Batch after {entity} id {}: {e}",
                        cursor.last_id
                    ));
                    tracing::warn!(
                        run_id,
                        entity_type = %entity,
                        last_id = cursor.last_id,
                        failed,
                        error = %e,
                        "Batch fetch failed, skipping ahead",
                    );
                    if failed > self.config.max_batch_errors {
                        return Ok(self.ceiling(format!("{failed} failed batches")));
                    }
                    cursor.last_id += i64::from(page_size);
                    self.store.save_cursor(entity, &cursor, 0).await?;
                    if !tracker.checkpoint(self.store).await? {
                        return Ok(IngestOutcome::Cancelled);
                    }
                    if !self.pause(self.config.upstream_error_delay).await {
                        return Ok(IngestOutcome::Interrupted);
                    }
                    continue;
                }
            };

            if page.is_empty() {
                tracing::debug!(run_id, entity_type = %entity, last_id = cursor.last_id, "Empty page");
                break;
            }

            let outcome = match self.write_page(entity, &page, skip_existing).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let failed = tracker.record_batch_error(format!(
                        "Writing {entity} batch after id {}: {e}",
                        cursor.last_id
                    ));
                    tracing::warn!(
                        run_id,
                        entity_type = %entity,
                        last_id = cursor.last_id,
                        failed,
                        error = %e,
                        "Batch write failed, cursor kept",
                    );
                    if failed > self.config.max_batch_errors {
                        return Ok(self.ceiling(format!("{failed} failed batches")));
                    }
                    if !self.pause(self.config.upstream_error_delay).await {
                        return Ok(IngestOutcome::Interrupted);
                    }
                    continue;
                }
            };

            let batch = page.len() as u64;
            processed += batch;
            tracker.counts.processed += batch;
            tracker.counts.observe_total(page.total);
            tracker.record_batch(outcome);

            if let Some(refs) = remote_refs.as_deref_mut() {
                refs.extend(page.records.iter().filter_map(|r| record_id(r, id_keys(entity))));
            }
            if let Some(latest) = latest_modification(&page.records) {
                if latest > watermark {
                    watermark = latest;
                    tracker.set_watermark(entity, latest);
                }
            }

            cursor.last_id = next_cursor_id(&page, entity, cursor.last_id, page_size);
            self.store.save_cursor(entity, &cursor, batch).await?;
            if !tracker.checkpoint(self.store).await? {
                return Ok(IngestOutcome::Cancelled);
            }

            tracing::info!(
                run_id,
                entity_type = %entity,
                last_id = cursor.last_id,
                batch,
                processed = tracker.counts.processed,
                errors = tracker.counts.errors,
                "Batch committed",
            );

            if tracker.counts.errors > self.config.max_record_errors {
                return Ok(self.ceiling(format!("{} record errors", tracker.counts.errors)));
            }
            if !has_more(&page, processed, page_size) {
                break;
            }
            if !self.pause(self.config.batch_delay).await {
                return Ok(IngestOutcome::Interrupted);
            }
        }

        let final_cursor = Cursor {
            since: watermark,
            last_id: cursor.last_id,
        };
        self.store.save_cursor(entity, &final_cursor, 0).await?;
        tracing::info!(
            run_id,
            entity_type = %entity,
            processed,
            last_id = final_cursor.last_id,
            since = %final_cursor.since,
            "Ingestion exhausted upstream",
        );
        Ok(IngestOutcome::Exhausted)
    }

    async fn local_count(&self, entity: EntityType) -> Result<i64, StoreError> {
        match entity {
            EntityType::Vehicles => self.store.count_vehicles().await,
            _ => self.store.count_parts(self.config.company_id).await,
        }
    }

    async fn interruption(&self, run_id: DbId) -> Result<Option<IngestOutcome>, StoreError> {
        if self.shutdown.is_cancelled() {
            return Ok(Some(IngestOutcome::Interrupted));
        }
        let status = self.store.get_run(run_id).await?.map(|run| run.status());
        Ok(match status {
            Some(ImportRunStatus::Paused) => Some(IngestOutcome::Paused),
            Some(status) if status.is_terminal() => Some(IngestOutcome::Cancelled),
            None => Some(IngestOutcome::Cancelled),
            Some(_) => None,
        })
    }

    /// Sleep for `delay`. Returns `false` when shutdown cut it short.
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.shutdown.is_cancelled();
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn ceiling(&self, reason: String) -> IngestOutcome {
        let message = SyncError::ErrorCeiling(reason).to_string();
        tracing::error!(%message, "Stopping run");
        IngestOutcome::Failed(message)
    }

    async fn write_page(
        &self,
        entity: EntityType,
        page: &RawPage,
        skip_existing: bool,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut rejected = Vec::new();
        let mut outcome = match entity {
            EntityType::Vehicles => {
                let vehicles = page
                    .records
                    .iter()
                    .filter_map(|raw| {
                        normalize_vehicle(raw)
                            .map_err(|e| rejected.push(rejection("Vehicle", raw, entity, &e)))
                            .ok()
                    })
                    .collect();
                upsert_vehicles(self.store, vehicles, skip_existing).await?
            }
            _ => {
                let index = VehicleIndex::for_page(self.store, page).await?;
                let parts = page
                    .records
                    .iter()
                    .filter_map(|raw| {
                        let vehicle_id = record_id(raw, VEHICLE_REF_KEYS).filter(|id| *id != 0);
                        let exists = vehicle_id.is_some_and(|id| index.exists(id));
                        let hint = vehicle_id.and_then(|id| index.hint(id));
                        normalize_part(raw, self.config.company_id, exists, hint)
                            .map_err(|e| rejected.push(rejection("Part", raw, entity, &e)))
                            .ok()
                    })
                    .collect();
                upsert_parts(self.store, parts, &index, skip_existing).await?
            }
        };
        if !rejected.is_empty() {
            tracing::debug!(rejected = rejected.len(), "Records failed normalization");
            rejected.append(&mut outcome.errors);
            outcome.errors = rejected;
        }
        Ok(outcome)
    }
}

fn rejection(label: &str, raw: &Value, entity: EntityType, err: &NormalizationError) -> String {
    match record_id(raw, id_keys(entity)) {
        Some(id) => format!("{label} {id}: {err}"),
        None => format!("{label} record: {err}"),
    }
}
