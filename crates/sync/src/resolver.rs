//! Relationship resolver: links parked parts once their vehicle exists.

use std::collections::HashMap;
use std::sync::Arc;

use partsync_core::normalize::decide_activation;
use partsync_core::types::DbId;
use partsync_db::models::vehicle_part::ResolvedLink;
use partsync_events::{names, EventBus, SyncEvent};

use crate::error::StoreError;
use crate::store::CatalogStore;
use crate::upsert::VEHICLE_LOOKUP_CHUNK;

/// Result of one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOutcome {
    /// Pending parts looked at.
    pub examined: u64,
    /// Parts linked and taken out of the pending set.
    pub resolved: u64,
}

pub struct RelationResolver {
    store: Arc<dyn CatalogStore>,
    bus: Arc<EventBus>,
    page_size: i64,
}

impl RelationResolver {
    pub fn new(store: Arc<dyn CatalogStore>, bus: Arc<EventBus>, page_size: i64) -> Self {
        Self {
            store,
            bus,
            page_size: page_size.max(1),
        }
    }

    /// Walk the pending parts in id order, one page at a time, and resolve
    /// every part whose vehicle is now stored.
    ///
    /// Publishes [`names::PART_COUNTERS_STALE`] when anything was resolved.
    pub async fn resolve(&self) -> Result<ResolveOutcome, StoreError> {
        let mut outcome = ResolveOutcome::default();
        let mut after_id: DbId = 0;

        loop {
            let page = self.store.pending_parts(after_id, self.page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;
            outcome.examined += page.len() as u64;

            let mut vehicle_ids: Vec<i64> = page.iter().map(|p| p.external_vehicle_id).collect();
            vehicle_ids.sort_unstable();
            vehicle_ids.dedup();

            let mut local: HashMap<i64, DbId> = HashMap::new();
            for chunk in vehicle_ids.chunks(VEHICLE_LOOKUP_CHUNK) {
                for summary in self.store.vehicle_summaries(chunk).await? {
                    local.insert(summary.external_id, summary.id);
                }
            }

            let links: Vec<ResolvedLink> = page
                .iter()
                .filter_map(|p| {
                    let vehicle_id = *local.get(&p.external_vehicle_id)?;
                    let (active, _) = decide_activation(
                        &p.source_status,
                        &p.title,
                        Some(p.external_vehicle_id),
                        true,
                        &p.price,
                    );
                    Some(ResolvedLink {
                        part_id: p.id,
                        vehicle_id,
                        external_vehicle_id: p.external_vehicle_id,
                        active,
                    })
                })
                .collect();

            if !links.is_empty() {
                outcome.resolved += self.store.resolve_links(&links).await?;
            }

            if (page.len() as i64) < self.page_size {
                break;
            }
        }

        if outcome.resolved > 0 {
            tracing::info!(
                resolved = outcome.resolved,
                examined = outcome.examined,
                "Resolved pending part relations",
            );
            self.bus.publish(
                SyncEvent::new(names::PART_COUNTERS_STALE)
                    .with_payload(serde_json::json!({ "resolved": outcome.resolved })),
            );
        } else {
            tracing::debug!(examined = outcome.examined, "No pending relations resolvable");
        }
        Ok(outcome)
    }
}
