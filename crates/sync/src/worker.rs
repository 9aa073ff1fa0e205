//! Run queue and the worker task that executes queued runs.

use std::collections::HashMap;
use std::sync::Arc;

use partsync_core::types::DbId;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::runner::ImportRunner;

/// Sending half of the run queue. Cheap to clone.
#[derive(Clone)]
pub struct RunQueue {
    sender: mpsc::UnboundedSender<DbId>,
}

impl RunQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DbId>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue a run for execution. Returns `false` when no worker is
    /// listening; the run then waits for recovery on the next start.
    pub fn submit(&self, run_id: DbId) -> bool {
        self.sender.send(run_id).is_ok()
    }
}

/// Executes queued runs, each on its own task.
///
/// A run submitted again while its task is still alive (e.g. resumed
/// before the task observed the pause) is executed once more after the
/// task ends instead of concurrently.
pub struct ImportWorker {
    runner: Arc<ImportRunner>,
    receiver: mpsc::UnboundedReceiver<DbId>,
}

impl ImportWorker {
    pub fn new(runner: Arc<ImportRunner>, receiver: mpsc::UnboundedReceiver<DbId>) -> Self {
        Self { runner, receiver }
    }

    /// Run until `cancel` fires, then wait for in-flight runs to reach a
    /// batch boundary and stop.
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            runner,
            mut receiver,
        } = self;
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut task_runs: HashMap<task::Id, DbId> = HashMap::new();
        // run id -> resubmitted while running
        let mut in_flight: HashMap<DbId, bool> = HashMap::new();

        tracing::info!("Import worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(in_flight = in_flight.len(), "Import worker stopping");
                    break;
                }
                Some(run_id) = receiver.recv() => {
                    if let Some(requeue) = in_flight.get_mut(&run_id) {
                        tracing::debug!(run_id, "Run already executing, will re-run after it ends");
                        *requeue = true;
                        continue;
                    }
                    in_flight.insert(run_id, false);
                    spawn_run(&mut tasks, &mut task_runs, &runner, run_id, &cancel);
                }
                Some(joined) = tasks.join_next_with_id() => {
                    let task_id = match &joined {
                        Ok((id, ())) => *id,
                        Err(e) => e.id(),
                    };
                    let Some(run_id) = task_runs.remove(&task_id) else {
                        continue;
                    };
                    if let Err(e) = joined {
                        tracing::error!(run_id, error = %e, "Import run task panicked");
                    }
                    if in_flight.remove(&run_id) == Some(true) && !cancel.is_cancelled() {
                        in_flight.insert(run_id, false);
                        spawn_run(&mut tasks, &mut task_runs, &runner, run_id, &cancel);
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Import run task panicked during shutdown");
            }
        }
        tracing::info!("Import worker stopped");
    }
}

fn spawn_run(
    tasks: &mut JoinSet<()>,
    task_runs: &mut HashMap<task::Id, DbId>,
    runner: &Arc<ImportRunner>,
    run_id: DbId,
    cancel: &CancellationToken,
) {
    let runner = Arc::clone(runner);
    let shutdown = cancel.clone();
    let handle = tasks.spawn(async move {
        if let Err(e) = runner.execute(run_id, &shutdown).await {
            tracing::error!(run_id, error = %e, "Import run errored");
        }
    });
    task_runs.insert(handle.id(), run_id);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use partsync_core::catalog::{Cursor, EntityType};
    use partsync_core::config::SyncConfig;
    use partsync_core::import_run::ImportRunStatus;
    use partsync_db::models::import_run::CreateImportRun;
    use partsync_events::EventBus;
    use partsync_inventory::{CatalogSource, ClientError, RawPage};
    use serde_json::json;

    use super::*;
    use crate::store::CatalogStore;
    use crate::testing::{vehicle_page, MemoryStore, ScriptedSource};

    fn runner_with(store: Arc<MemoryStore>, source: Arc<dyn CatalogSource>) -> Arc<ImportRunner> {
        let config = Arc::new(SyncConfig {
            batch_delay: Duration::ZERO,
            ..Default::default()
        });
        Arc::new(ImportRunner::new(
            store,
            source,
            config,
            Arc::new(EventBus::default()),
        ))
    }

    async fn vehicles_run(store: &MemoryStore) -> DbId {
        store
            .create_run(&CreateImportRun {
                entity_type: "vehicles".into(),
                run_mode: "full".into(),
                from_date: None,
                details: json!({}),
            })
            .await
            .unwrap()
            .id
    }

    async fn wait_terminal(store: &MemoryStore, run_id: DbId) -> ImportRunStatus {
        let mut status = ImportRunStatus::Pending;
        for _ in 0..200 {
            status = store.get_run(run_id).await.unwrap().unwrap().status();
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        status
    }

    /// Panics on the first fetch, then serves the script.
    struct PanicOnce {
        inner: ScriptedSource,
        panicked: AtomicBool,
    }

    #[async_trait]
    impl CatalogSource for PanicOnce {
        async fn fetch_batch(
            &self,
            entity: EntityType,
            cursor: &Cursor,
            page_size: u32,
        ) -> Result<RawPage, ClientError> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("client bug");
            }
            self.inner.fetch_batch(entity, cursor, page_size).await
        }
    }

    #[tokio::test]
    async fn executes_submitted_runs_and_stops_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(ScriptedSource::new());
        source.page(EntityType::Vehicles, vehicle_page([1, 2, 3]));
        let (queue, receiver) = RunQueue::channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            ImportWorker::new(runner_with(store.clone(), source), receiver).run(cancel.clone()),
        );

        let run_id = vehicles_run(&store).await;
        assert!(queue.submit(run_id));

        assert_eq!(wait_terminal(&store, run_id).await, ImportRunStatus::Completed);
        assert_eq!(store.vehicle_count(), 3);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn run_is_accepted_again_after_its_task_panicked() {
        let store = Arc::new(MemoryStore::new());
        let inner = ScriptedSource::new();
        inner.page(EntityType::Vehicles, vehicle_page([1, 2]));
        let source = Arc::new(PanicOnce {
            inner,
            panicked: AtomicBool::new(false),
        });
        let (queue, receiver) = RunQueue::channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            ImportWorker::new(runner_with(store.clone(), source.clone()), receiver)
                .run(cancel.clone()),
        );

        let run_id = vehicles_run(&store).await;
        assert!(queue.submit(run_id));
        for _ in 0..200 {
            if source.panicked.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Let the worker observe the panicked task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            store.get_run(run_id).await.unwrap().unwrap().status(),
            ImportRunStatus::InProgress
        );

        assert!(queue.submit(run_id));
        assert_eq!(wait_terminal(&store, run_id).await, ImportRunStatus::Completed);
        assert_eq!(store.vehicle_count(), 2);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn submit_without_worker_reports_failure() {
        let (queue, receiver) = RunQueue::channel();
        drop(receiver);
        assert!(!queue.submit(1));
    }
}
