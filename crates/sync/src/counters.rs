//! Background refresh of the per-vehicle active part counters.
//!
//! Runs publish [`names::PART_COUNTERS_STALE`] when they finish; this task
//! recomputes the counters once per burst of stale notifications.

use std::sync::Arc;

use partsync_events::{names, EventBus, SyncEvent};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::store::CatalogStore;

pub struct PartCounterRefresher {
    store: Arc<dyn CatalogStore>,
    bus: Arc<EventBus>,
}

impl PartCounterRefresher {
    pub fn new(store: Arc<dyn CatalogStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Consume events from `receiver` until the bus closes or `cancel`
    /// fires.
    pub async fn run(
        &self,
        mut receiver: broadcast::Receiver<SyncEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Part counter refresher started");

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Part counter refresher stopping");
                    break;
                }
                received = receiver.recv() => received,
            };

            match received {
                Ok(event) if event.is(names::PART_COUNTERS_STALE) => {
                    if !drain_stale(&mut receiver) {
                        self.refresh().await;
                        tracing::info!("Event bus closed, part counter refresher stopping");
                        break;
                    }
                    self.refresh().await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    // A stale notification may have been among the dropped ones.
                    tracing::warn!(skipped, "Part counter refresher lagged, refreshing");
                    self.refresh().await;
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Event bus closed, part counter refresher stopping");
                    break;
                }
            }
        }
    }

    async fn refresh(&self) {
        match self.store.recompute_part_counters().await {
            Ok(vehicles_updated) => {
                tracing::info!(vehicles_updated, "Part counters recomputed");
                self.bus.publish(
                    SyncEvent::new(names::PART_COUNTERS_RECOMPUTED)
                        .with_payload(json!({ "vehicles_updated": vehicles_updated })),
                );
            }
            Err(e) => tracing::error!(error = %e, "Failed to recompute part counters"),
        }
    }
}

/// Discard everything already queued. Returns `false` if the bus closed.
fn drain_stale(receiver: &mut broadcast::Receiver<SyncEvent>) -> bool {
    loop {
        match receiver.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Closed) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{part, vehicle, MemoryStore, COMPANY};

    async fn next_recomputed(rx: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.is(names::PART_COUNTERS_RECOMPUTED) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    // -- Refresh ------------------------------------------------------------

    #[tokio::test]
    async fn stale_burst_triggers_a_single_recompute() {
        let store = Arc::new(MemoryStore::new());
        store.seed_vehicles(&[vehicle(10), vehicle(11)]);
        store.seed_parts(&[
            part(1, 10, "2500", true),
            part(2, 10, "1800", true),
            part(3, 11, "0", true),
        ]);
        store.link_parts(COMPANY, &[1, 2, 3]).await.unwrap();

        let bus = Arc::new(EventBus::default());
        let receiver = bus.subscribe();
        let mut observer = bus.subscribe();
        bus.publish(SyncEvent::new(names::PART_COUNTERS_STALE));
        bus.publish(SyncEvent::new(names::IMPORT_FINISHED));
        bus.publish(SyncEvent::new(names::PART_COUNTERS_STALE));

        let cancel = CancellationToken::new();
        let refresher = PartCounterRefresher::new(store.clone(), bus.clone());
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { refresher.run(receiver, cancel).await }
        });

        let event = next_recomputed(&mut observer).await;
        assert_eq!(event.payload["vehicles_updated"], 1);
        assert_eq!(store.vehicle(10).unwrap().active_parts, 2);
        assert_eq!(store.vehicle(11).unwrap().active_parts, 0);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(store.counter_recomputes(), 1);
    }

    #[tokio::test]
    async fn unrelated_events_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let receiver = bus.subscribe();
        bus.publish(SyncEvent::new(names::IMPORT_STARTED));
        bus.publish(SyncEvent::new(names::PART_COUNTERS_RECOMPUTED));

        let cancel = CancellationToken::new();
        let refresher = PartCounterRefresher::new(store.clone(), bus.clone());
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { refresher.run(receiver, cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(store.counter_recomputes(), 0);
    }

    #[tokio::test]
    async fn lagging_behind_forces_a_refresh() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new(2));
        let receiver = bus.subscribe();
        for _ in 0..5 {
            bus.publish(SyncEvent::new(names::IMPORT_STARTED));
        }

        let cancel = CancellationToken::new();
        let refresher = PartCounterRefresher::new(store.clone(), bus.clone());
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { refresher.run(receiver, cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(store.counter_recomputes(), 1);
    }

    #[tokio::test]
    async fn stops_when_the_bus_closes() {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::default();
        let receiver = bus.subscribe();
        drop(bus);

        let refresher = PartCounterRefresher::new(store, Arc::new(EventBus::default()));
        tokio::time::timeout(
            Duration::from_secs(5),
            refresher.run(receiver, CancellationToken::new()),
        )
        .await
        .unwrap();
    }
}
