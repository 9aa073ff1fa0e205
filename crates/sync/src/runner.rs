//! Executes one import run end to end.
//!
//! The runner claims the run (`pending -> in_progress`), drives ingestion
//! for the run's entity type, resolves pending relations, reconciles after
//! full parts runs, and settles the run into its final status.

use std::collections::HashSet;
use std::sync::Arc;

use partsync_core::catalog::{EntityType, RunMode};
use partsync_core::config::SyncConfig;
use partsync_core::import_run::{CatalogPhase, ImportRunStatus};
use partsync_core::types::DbId;
use partsync_events::{names, EventBus, SyncEvent};
use partsync_inventory::CatalogSource;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, SyncError};
use crate::ingest::{IngestOutcome, Ingestor};
use crate::reconciler::{reconcile, sweep_remote_refs};
use crate::resolver::RelationResolver;
use crate::store::CatalogStore;
use crate::tracker::RunTracker;

/// Set once a full parts ingestion has begun; a resumed run carrying it
/// only saw part of the upstream ids.
const PARTS_STARTED_KEY: &str = "parts_ingest_started";
const RECONCILE_KEY: &str = "reconcile";
const FAILURE_KEY: &str = "failure_reason";

const CATALOG_PHASES: [CatalogPhase; 3] = [
    CatalogPhase::Vehicles,
    CatalogPhase::Parts,
    CatalogPhase::Relations,
];

pub struct ImportRunner {
    store: Arc<dyn CatalogStore>,
    source: Arc<dyn CatalogSource>,
    config: Arc<SyncConfig>,
    bus: Arc<EventBus>,
}

impl ImportRunner {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        source: Arc<dyn CatalogSource>,
        config: Arc<SyncConfig>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            source,
            config,
            bus,
        }
    }

    /// Run `run_id` until it settles, pauses, or `shutdown` fires.
    ///
    /// Runs that are neither `pending` nor `in_progress` are left alone.
    pub async fn execute(&self, run_id: DbId, shutdown: &CancellationToken) -> Result<(), SyncError> {
        let Some(run) = self.store.get_run(run_id).await? else {
            tracing::warn!(run_id, "Import run vanished before execution");
            return Ok(());
        };

        let run = match run.status() {
            ImportRunStatus::Pending => {
                match self
                    .store
                    .transition_run(run_id, &[ImportRunStatus::Pending], ImportRunStatus::InProgress)
                    .await?
                {
                    Some(run) => run,
                    None => {
                        tracing::debug!(run_id, "Run left pending before pickup");
                        return Ok(());
                    }
                }
            }
            ImportRunStatus::InProgress => run,
            status => {
                tracing::debug!(run_id, %status, "Run is not runnable, skipping");
                return Ok(());
            }
        };

        let mut tracker = RunTracker::from_run(&run, &self.config);
        let Some(entity) = EntityType::from_str(&run.entity_type) else {
            let outcome = IngestOutcome::Failed(format!("Unknown entity type '{}'", run.entity_type));
            return self.settle(&mut tracker, EntityType::Catalog, outcome).await;
        };
        let Some(mode) = RunMode::from_str(&run.run_mode) else {
            let outcome = IngestOutcome::Failed(format!("Unknown run mode '{}'", run.run_mode));
            return self.settle(&mut tracker, entity, outcome).await;
        };

        tracing::info!(run_id, entity_type = %entity, run_mode = %mode, "Import run started");
        self.bus.publish(
            SyncEvent::new(names::IMPORT_STARTED)
                .with_run(entity, run_id)
                .with_payload(json!({ "run_mode": mode.as_str() })),
        );

        match self.drive(&mut tracker, entity, mode, shutdown).await {
            Ok(outcome) => self.settle(&mut tracker, entity, outcome).await,
            Err(e) => {
                tracing::error!(run_id, entity_type = %entity, error = %e, "Import run aborted");
                tracker.record_error(e.to_string());
                if let Err(finish_err) = tracker
                    .finish(
                        self.store.as_ref(),
                        &[ImportRunStatus::InProgress, ImportRunStatus::Paused],
                        ImportRunStatus::Failed,
                    )
                    .await
                {
                    tracing::warn!(run_id, error = %finish_err, "Could not mark run failed");
                }
                self.publish_finished(entity, run_id, ImportRunStatus::Failed);
                Err(e.into())
            }
        }
    }

    async fn drive(
        &self,
        tracker: &mut RunTracker,
        entity: EntityType,
        mode: RunMode,
        shutdown: &CancellationToken,
    ) -> Result<IngestOutcome, StoreError> {
        let ingestor = Ingestor::new(
            self.store.as_ref(),
            self.source.as_ref(),
            &self.config,
            shutdown,
        );

        let outcome = match entity {
            EntityType::Vehicles => ingestor.run(tracker, EntityType::Vehicles, mode, None).await?,
            EntityType::Parts => self.ingest_parts(&ingestor, tracker, mode).await?,
            EntityType::Catalog => return self.drive_catalog(&ingestor, tracker, mode).await,
        };
        if outcome == IngestOutcome::Exhausted {
            self.resolve_relations().await?;
        }
        Ok(outcome)
    }

    async fn drive_catalog(
        &self,
        ingestor: &Ingestor<'_>,
        tracker: &mut RunTracker,
        mode: RunMode,
    ) -> Result<IngestOutcome, StoreError> {
        let start = tracker.phase().unwrap_or(CatalogPhase::Vehicles);
        for phase in CATALOG_PHASES.into_iter().filter(|p| *p >= start) {
            tracker.set_phase(phase);
            if !tracker.checkpoint(self.store.as_ref()).await? {
                return Ok(IngestOutcome::Cancelled);
            }
            tracing::info!(run_id = tracker.run_id(), phase = phase.as_str(), "Catalog phase");

            let outcome = match phase {
                CatalogPhase::Vehicles => {
                    ingestor.run(tracker, EntityType::Vehicles, mode, None).await?
                }
                CatalogPhase::Parts => self.ingest_parts(ingestor, tracker, mode).await?,
                CatalogPhase::Relations => {
                    self.resolve_relations().await?;
                    IngestOutcome::Exhausted
                }
            };
            if outcome != IngestOutcome::Exhausted {
                return Ok(outcome);
            }
        }
        Ok(IngestOutcome::Exhausted)
    }

    /// Parts ingestion; full runs finish with a reconciliation pass.
    async fn ingest_parts(
        &self,
        ingestor: &Ingestor<'_>,
        tracker: &mut RunTracker,
        mode: RunMode,
    ) -> Result<IngestOutcome, StoreError> {
        if mode == RunMode::Incremental {
            return ingestor.run(tracker, EntityType::Parts, mode, None).await;
        }

        let resumed = tracker.flag(PARTS_STARTED_KEY);
        tracker.set_detail(PARTS_STARTED_KEY, Value::Bool(true));
        let mut seen = HashSet::new();
        let outcome = ingestor
            .run(tracker, EntityType::Parts, mode, Some(&mut seen))
            .await?;
        if outcome != IngestOutcome::Exhausted {
            return Ok(outcome);
        }

        let remote = if resumed {
            tracing::info!(run_id = tracker.run_id(), "Resumed full run, sweeping upstream ids");
            match sweep_remote_refs(
                self.source.as_ref(),
                &self.config,
                self.config.upstream_error_delay,
            )
            .await
            {
                Ok(refs) => refs,
                Err(e) => {
                    tracing::warn!(run_id = tracker.run_id(), error = %e, "Remote id sweep failed");
                    tracker.warn(format!("Reconciliation skipped: remote id sweep failed: {e}"));
                    return Ok(outcome);
                }
            }
        } else {
            seen
        };

        let report = reconcile(
            self.store.as_ref(),
            self.config.company_id,
            &remote,
            self.config.reconcile_threshold_percent,
        )
        .await?;
        tracker.counts.deactivated += report.flagged;
        if let Some(warning) = report.warning() {
            tracker.warn(warning);
        }
        tracker.set_detail(RECONCILE_KEY, report.summary());
        Ok(outcome)
    }

    async fn resolve_relations(&self) -> Result<(), StoreError> {
        RelationResolver::new(
            self.store.clone(),
            self.bus.clone(),
            self.config.pending_page_size,
        )
        .resolve()
        .await
        .map(|_| ())
    }

    async fn settle(
        &self,
        tracker: &mut RunTracker,
        entity: EntityType,
        outcome: IngestOutcome,
    ) -> Result<(), SyncError> {
        let run_id = tracker.run_id();
        let store = self.store.as_ref();
        match outcome {
            IngestOutcome::Exhausted => {
                let status = ImportRunStatus::finished(tracker.counts.errors);
                if tracker
                    .finish(store, &[ImportRunStatus::InProgress], status)
                    .await?
                    .is_none()
                {
                    tracing::info!(run_id, "Run changed status before it could complete");
                    return Ok(());
                }
                tracing::info!(
                    run_id,
                    entity_type = %entity,
                    %status,
                    processed = tracker.counts.processed,
                    inserted = tracker.counts.inserted,
                    updated = tracker.counts.updated,
                    errors = tracker.counts.errors,
                    "Import run finished",
                );
                self.bus.publish(
                    SyncEvent::new(names::PART_COUNTERS_STALE).with_run(entity, run_id),
                );
                self.publish_finished(entity, run_id, status);
            }
            IngestOutcome::Paused => {
                tracker.checkpoint(store).await?;
                tracing::info!(run_id, "Import run paused");
            }
            IngestOutcome::Interrupted => {
                tracker.checkpoint(store).await?;
                tracing::info!(run_id, "Import run interrupted by shutdown, left in progress");
            }
            IngestOutcome::Cancelled => {
                tracing::info!(run_id, "Import run cancelled");
                self.publish_finished(entity, run_id, ImportRunStatus::Cancelled);
            }
            IngestOutcome::Failed(reason) => {
                tracing::error!(run_id, entity_type = %entity, %reason, "Import run failed");
                tracker.set_detail(FAILURE_KEY, Value::String(reason));
                tracker
                    .finish(
                        store,
                        &[ImportRunStatus::InProgress, ImportRunStatus::Paused],
                        ImportRunStatus::Failed,
                    )
                    .await?;
                self.publish_finished(entity, run_id, ImportRunStatus::Failed);
            }
        }
        Ok(())
    }

    fn publish_finished(&self, entity: EntityType, run_id: DbId, status: ImportRunStatus) {
        self.bus.publish(
            SyncEvent::new(names::IMPORT_FINISHED)
                .with_run(entity, run_id)
                .with_payload(json!({ "status": status.as_str() })),
        );
    }
}
