//! In-flight bookkeeping for one import run.
//!
//! The tracker owns the counters, bounded error list and details blob of a
//! run while it executes, and writes them back after every batch. It is
//! seeded from the stored row so a resumed run keeps counting where it
//! stopped.

use partsync_core::catalog::EntityType;
use partsync_core::config::SyncConfig;
use partsync_core::import_run::{CatalogPhase, ErrorLog, ImportRunStatus, RunCounts};
use partsync_core::types::{DbId, Timestamp};
use partsync_db::models::import_run::{ImportRun, RunProgress};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::store::CatalogStore;
use crate::upsert::UpsertOutcome;

const PHASE_KEY: &str = "phase";
const WARNINGS_KEY: &str = "warnings";
const BATCH_ERRORS_KEY: &str = "batch_errors";

pub struct RunTracker {
    run_id: DbId,
    pub counts: RunCounts,
    errors: ErrorLog,
    details: Map<String, Value>,
    batch_errors: u32,
}

impl RunTracker {
    /// Seed a tracker from the stored run row.
    pub fn from_run(run: &ImportRun, config: &SyncConfig) -> Self {
        let details = match &run.details {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let batch_errors = details
            .get(BATCH_ERRORS_KEY)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        Self {
            run_id: run.id,
            counts: run.counts(),
            errors: ErrorLog::from_existing(run.errors.clone(), config.max_error_messages),
            details,
            batch_errors,
        }
    }

    pub fn run_id(&self) -> DbId {
        self.run_id
    }

    /// Record one failed record or operation.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.counts.errors += 1;
        self.errors.push(message);
    }

    /// Record a failed batch and return the number of failed batches so far.
    pub fn record_batch_error(&mut self, message: impl Into<String>) -> u32 {
        self.batch_errors += 1;
        self.details
            .insert(BATCH_ERRORS_KEY.into(), Value::from(self.batch_errors));
        self.record_error(message);
        self.batch_errors
    }

    /// Fold a written batch into the counters.
    pub fn record_batch(&mut self, outcome: UpsertOutcome) {
        self.counts.inserted += outcome.inserted;
        self.counts.updated += outcome.updated;
        self.counts.skipped += outcome.skipped;
        self.counts.pending += outcome.pending;
        for message in outcome.errors {
            self.record_error(message);
        }
    }

    /// Attach a warning. Warnings do not count as errors.
    pub fn warn(&mut self, message: impl Into<String>) {
        let entry = self
            .details
            .entry(WARNINGS_KEY)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = entry {
            list.push(Value::String(message.into()));
        }
    }

    pub fn warnings(&self) -> Vec<String> {
        self.details
            .get(WARNINGS_KEY)
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn phase(&self) -> Option<CatalogPhase> {
        self.details
            .get(PHASE_KEY)
            .and_then(Value::as_str)
            .and_then(CatalogPhase::from_str)
    }

    pub fn set_phase(&mut self, phase: CatalogPhase) {
        self.set_detail(PHASE_KEY, Value::from(phase.as_str()));
    }

    pub fn set_detail(&mut self, key: &str, value: Value) {
        self.details.insert(key.to_string(), value);
    }

    pub fn flag(&self, key: &str) -> bool {
        self.details.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Highest upstream modification date committed for `entity`.
    pub fn watermark(&self, entity: EntityType) -> Option<Timestamp> {
        self.details
            .get(&watermark_key(entity))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_watermark(&mut self, entity: EntityType, at: Timestamp) {
        if let Ok(value) = serde_json::to_value(at) {
            self.details.insert(watermark_key(entity), value);
        }
    }

    pub fn progress(&self) -> RunProgress {
        RunProgress {
            counts: self.counts,
            errors: self.errors.to_vec(),
            details: Value::Object(self.details.clone()),
        }
    }

    /// Persist the current snapshot. Returns `false` once the run has
    /// become terminal elsewhere.
    pub async fn checkpoint(&self, store: &dyn CatalogStore) -> Result<bool, StoreError> {
        Ok(store
            .update_run_progress(self.run_id, &self.progress())
            .await?
            .is_some())
    }

    /// Write the final snapshot with `status`, if the run is still in one
    /// of `from`.
    pub async fn finish(
        &self,
        store: &dyn CatalogStore,
        from: &[ImportRunStatus],
        status: ImportRunStatus,
    ) -> Result<Option<ImportRun>, StoreError> {
        store
            .finish_run(self.run_id, from, status, &self.progress())
            .await
    }
}

fn watermark_key(entity: EntityType) -> String {
    format!("{}_watermark", entity.as_str())
}
