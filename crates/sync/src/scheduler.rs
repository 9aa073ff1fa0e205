//! Periodic import scheduler.
//!
//! Polls `import_schedules` on a fixed interval and starts due imports
//! through [`ImportService`], so scheduled starts obey the same conflict
//! rules as operator starts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use partsync_core::catalog::EntityType;
use partsync_core::error::CoreError;
use partsync_core::schedule::{next_run, DEFAULT_SCHEDULES};
use partsync_core::types::Timestamp;
use partsync_db::models::import_schedule::UpsertImportSchedule;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, SyncError};
use crate::service::ImportService;
use crate::store::CatalogStore;

/// Retry delay for a schedule whose frequency cannot be parsed.
const INVALID_SCHEDULE_RETRY: chrono::Duration = chrono::Duration::hours(1);

pub struct ImportScheduler {
    store: Arc<dyn CatalogStore>,
    service: Arc<ImportService>,
    poll_interval: Duration,
}

impl ImportScheduler {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        service: Arc<ImportService>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            service,
            poll_interval,
        }
    }

    /// Create the default schedules that do not exist yet.
    pub async fn seed_defaults(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut created = 0;
        for (entity, frequency, full_import) in DEFAULT_SCHEDULES {
            let input = UpsertImportSchedule {
                entity_type: entity.as_str().to_string(),
                frequency: (*frequency).to_string(),
                full_import: *full_import,
                active: true,
            };
            let first_run = next_run(now, frequency).unwrap_or(now);
            if self.store.seed_schedule(&input, first_run).await? {
                tracing::info!(entity_type = %entity, frequency, "Seeded import schedule");
                created += 1;
            }
        }
        Ok(created)
    }

    /// Run the polling loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            "Import scheduler started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Import scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(0) => tracing::debug!("No scheduled imports due"),
                        Ok(started) => tracing::info!(started, "Scheduled imports started"),
                        Err(e) => tracing::error!(error = %e, "Import scheduler tick failed"),
                    }
                }
            }
        }
    }

    /// Start every schedule due at `now`. Returns how many runs started.
    pub async fn tick(&self, now: Timestamp) -> Result<usize, StoreError> {
        let mut started = 0;
        for schedule in self.store.due_schedules(now).await? {
            let (entity, next) = match (
                EntityType::from_str(&schedule.entity_type),
                next_run(now, &schedule.frequency),
            ) {
                (Some(entity), Ok(next)) => (entity, next),
                (entity, next) => {
                    tracing::warn!(
                        schedule_id = schedule.id,
                        entity_type = %schedule.entity_type,
                        frequency = %schedule.frequency,
                        error = ?next.err(),
                        known_entity = entity.is_some(),
                        "Invalid import schedule, retrying later",
                    );
                    self.store
                        .mark_schedule_run(schedule.id, now, now + INVALID_SCHEDULE_RETRY)
                        .await?;
                    continue;
                }
            };

            match self
                .service
                .start_import(entity, None, schedule.full_import)
                .await
            {
                Ok(run_id) => {
                    tracing::info!(schedule_id = schedule.id, run_id, entity_type = %entity, "Scheduled import started");
                    started += 1;
                }
                Err(SyncError::Core(CoreError::Conflict(reason))) => {
                    tracing::info!(schedule_id = schedule.id, entity_type = %entity, %reason, "Scheduled import skipped");
                }
                Err(SyncError::Store(e)) => return Err(e),
                Err(e) => {
                    tracing::warn!(schedule_id = schedule.id, entity_type = %entity, error = %e, "Scheduled import failed to start");
                }
            }
            self.store.mark_schedule_run(schedule.id, now, next).await?;
        }
        Ok(started)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use partsync_core::import_run::ImportRunStatus;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::testing::MemoryStore;
    use crate::worker::RunQueue;

    fn scheduler() -> (Arc<MemoryStore>, ImportScheduler, UnboundedReceiver<i64>) {
        let store = Arc::new(MemoryStore::new());
        let (queue, receiver) = RunQueue::channel();
        let service = Arc::new(ImportService::new(store.clone(), queue));
        let scheduler = ImportScheduler::new(store.clone(), service, Duration::from_secs(60));
        (store, scheduler, receiver)
    }

    #[tokio::test]
    async fn defaults_are_seeded_once() {
        let (store, scheduler, _rx) = scheduler();
        assert_eq!(scheduler.seed_defaults().await.unwrap(), 3);
        assert_eq!(scheduler.seed_defaults().await.unwrap(), 0);
        assert_eq!(store.schedule("vehicles").unwrap().frequency, "12h");
        assert_eq!(store.schedule("catalog").unwrap().frequency, "24h");
    }

    #[tokio::test]
    async fn nothing_is_due_before_the_first_interval() {
        let (_store, scheduler, _rx) = scheduler();
        scheduler.seed_defaults().await.unwrap();
        assert_eq!(scheduler.tick(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn conflicting_schedules_are_rescheduled() {
        let (store, scheduler, _rx) = scheduler();
        scheduler.seed_defaults().await.unwrap();
        let now = Utc::now() + chrono::Duration::hours(25);

        // The catalog run claims both cursors; the other two conflict.
        assert_eq!(scheduler.tick(now).await.unwrap(), 1);

        let open = store.find_open_run(EntityType::ALL).await.unwrap().unwrap();
        assert_eq!(open.entity_type, "catalog");
        assert_eq!(open.status(), ImportRunStatus::Pending);
        for entity in ["vehicles", "parts", "catalog"] {
            let schedule = store.schedule(entity).unwrap();
            assert_eq!(schedule.last_run_at, Some(now));
            assert!(schedule.next_run_at.unwrap() > now);
        }
        assert_eq!(
            store.schedule("parts").unwrap().next_run_at,
            Some(now + chrono::Duration::hours(12))
        );
    }

    #[tokio::test]
    async fn invalid_frequency_is_retried_in_an_hour() {
        let (store, scheduler, _rx) = scheduler();
        let due = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store
            .seed_schedule(
                &UpsertImportSchedule {
                    entity_type: "parts".into(),
                    frequency: "every day".into(),
                    full_import: false,
                    active: true,
                },
                due,
            )
            .await
            .unwrap();

        let now = due + chrono::Duration::minutes(5);
        assert_eq!(scheduler.tick(now).await.unwrap(), 0);
        assert!(store.find_open_run(EntityType::ALL).await.unwrap().is_none());
        assert_eq!(
            store.schedule("parts").unwrap().next_run_at,
            Some(now + chrono::Duration::hours(1))
        );
    }
}
