//! Batch upsert engine.
//!
//! Each batch is written with one set-based upsert. When that statement
//! fails the batch is replayed record by record (existence check, then
//! insert or update) so one bad row cannot sink the rest. Per-record
//! failures are collected, never raised.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;

use partsync_core::catalog::{NormalizedPart, NormalizedVehicle, VehicleHint};
use partsync_core::envelope::{record_id, RawPage};
use partsync_core::normalize::normalize_vehicle;

use crate::error::StoreError;
use crate::store::CatalogStore;

/// Key variants holding a part's vehicle reference.
pub const VEHICLE_REF_KEYS: &[&str] = &["idVehiculo", "IdVehiculo"];

/// Largest id list sent in one vehicle lookup.
pub const VEHICLE_LOOKUP_CHUNK: usize = 500;

/// Counts for one written batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub pending: u64,
    pub errors: Vec<String>,
}

/// Keep the last occurrence of every key, in order.
fn dedupe_last<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    let mut kept: Vec<T> = items
        .into_iter()
        .rev()
        .filter(|item| seen.insert(key(item)))
        .collect();
    kept.reverse();
    kept
}

// ---------------------------------------------------------------------------
// Vehicle index
// ---------------------------------------------------------------------------

/// What a parts page knows about the vehicles it references.
///
/// `known` holds the ids present in the local store. Hints come from the
/// page's companion vehicle records first, then from stored vehicles.
#[derive(Debug, Clone, Default)]
pub struct VehicleIndex {
    known: HashSet<i64>,
    hints: HashMap<i64, VehicleHint>,
}

impl VehicleIndex {
    /// Build the index for one parts page.
    pub async fn for_page(store: &dyn CatalogStore, page: &RawPage) -> Result<Self, StoreError> {
        let mut ids: Vec<i64> = page
            .records
            .iter()
            .filter_map(|r| record_id(r, VEHICLE_REF_KEYS))
            .filter(|id| *id != 0)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let mut index = Self::default();
        for chunk in ids.chunks(VEHICLE_LOOKUP_CHUNK) {
            for summary in store.vehicle_summaries(chunk).await? {
                index.known.insert(summary.external_id);
                index.hints.insert(
                    summary.external_id,
                    VehicleHint {
                        make: summary.make,
                        model: summary.model,
                        trim: summary.trim_level,
                        year: summary.year,
                        fuel: summary.fuel,
                    },
                );
            }
        }

        for raw in &page.companion_vehicles {
            if let Ok(vehicle) = normalize_vehicle(raw) {
                let hint = vehicle.hint();
                if !hint.is_empty() {
                    index.hints.insert(vehicle.external_id, hint);
                }
            }
        }
        Ok(index)
    }

    /// Whether the vehicle exists in the local store.
    pub fn exists(&self, external_id: i64) -> bool {
        self.known.contains(&external_id)
    }

    pub fn hint(&self, external_id: i64) -> Option<&VehicleHint> {
        self.hints.get(&external_id)
    }
}

// ---------------------------------------------------------------------------
// Vehicles
// ---------------------------------------------------------------------------

/// Write a batch of vehicles.
///
/// With `skip_existing`, vehicles already stored are only touched and
/// counted as skipped.
pub async fn upsert_vehicles(
    store: &dyn CatalogStore,
    vehicles: Vec<NormalizedVehicle>,
    skip_existing: bool,
) -> Result<UpsertOutcome, StoreError> {
    let vehicles = dedupe_last(vehicles, |v| v.external_id);
    let mut outcome = UpsertOutcome::default();

    let to_write: Vec<NormalizedVehicle> = if skip_existing {
        let ids: Vec<i64> = vehicles.iter().map(|v| v.external_id).collect();
        let existing = store.existing_vehicle_ids(&ids).await?;
        if !existing.is_empty() {
            store.touch_vehicles(&existing).await?;
        }
        let existing: HashSet<i64> = existing.into_iter().collect();
        outcome.skipped = existing.len() as u64;
        vehicles
            .into_iter()
            .filter(|v| !existing.contains(&v.external_id))
            .collect()
    } else {
        vehicles
    };

    if to_write.is_empty() {
        return Ok(outcome);
    }

    match store.upsert_vehicles(&to_write).await {
        Ok(rows) => {
            for row in rows {
                if row.inserted {
                    outcome.inserted += 1;
                } else {
                    outcome.updated += 1;
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                batch = to_write.len(),
                error = %e,
                "Bulk vehicle upsert failed, writing records one by one",
            );
            for vehicle in &to_write {
                match write_vehicle(store, vehicle).await {
                    Ok(true) => outcome.inserted += 1,
                    Ok(false) => outcome.updated += 1,
                    Err(e) => {
                        tracing::debug!(external_id = vehicle.external_id, error = %e, "Vehicle write failed");
                        outcome
                            .errors
                            .push(format!("Vehicle {}: {e}", vehicle.external_id));
                    }
                }
            }
        }
    }
    Ok(outcome)
}

/// Returns whether the vehicle was inserted.
async fn write_vehicle(
    store: &dyn CatalogStore,
    vehicle: &NormalizedVehicle,
) -> Result<bool, StoreError> {
    let exists = !store
        .existing_vehicle_ids(&[vehicle.external_id])
        .await?
        .is_empty();
    if exists {
        store.update_vehicle(vehicle).await?;
        Ok(false)
    } else {
        store.insert_vehicle(vehicle).await?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Parts
// ---------------------------------------------------------------------------

fn refs_by_company<'a>(parts: impl Iterator<Item = &'a NormalizedPart>) -> BTreeMap<i64, Vec<i64>> {
    let mut grouped: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for p in parts {
        grouped.entry(p.company_id).or_default().push(p.external_ref);
    }
    grouped
}

/// Write a batch of parts and link the ones whose vehicle is in `index`.
///
/// `pending` counts written parts still waiting for their vehicle.
pub async fn upsert_parts(
    store: &dyn CatalogStore,
    parts: Vec<NormalizedPart>,
    index: &VehicleIndex,
    skip_existing: bool,
) -> Result<UpsertOutcome, StoreError> {
    let parts = dedupe_last(parts, |p| (p.company_id, p.external_ref));
    let mut outcome = UpsertOutcome::default();

    let to_write: Vec<NormalizedPart> = if skip_existing {
        let mut existing: HashSet<(i64, i64)> = HashSet::new();
        for (company_id, refs) in refs_by_company(parts.iter()) {
            let found = store.existing_part_refs(company_id, &refs).await?;
            if !found.is_empty() {
                store.touch_parts(company_id, &found).await?;
            }
            existing.extend(found.into_iter().map(|r| (company_id, r)));
        }
        outcome.skipped = existing.len() as u64;
        parts
            .into_iter()
            .filter(|p| !existing.contains(&(p.company_id, p.external_ref)))
            .collect()
    } else {
        parts
    };

    if to_write.is_empty() {
        return Ok(outcome);
    }

    let written: Vec<&NormalizedPart> = match store.upsert_parts(&to_write).await {
        Ok(rows) => {
            for row in rows {
                if row.inserted {
                    outcome.inserted += 1;
                } else {
                    outcome.updated += 1;
                }
            }
            to_write.iter().collect()
        }
        Err(e) => {
            tracing::warn!(
                batch = to_write.len(),
                error = %e,
                "Bulk part upsert failed, writing records one by one",
            );
            let mut written = Vec::with_capacity(to_write.len());
            for part in &to_write {
                match write_part(store, part).await {
                    Ok(inserted) => {
                        if inserted {
                            outcome.inserted += 1;
                        } else {
                            outcome.updated += 1;
                        }
                        written.push(part);
                    }
                    Err(e) => {
                        tracing::debug!(external_ref = part.external_ref, error = %e, "Part write failed");
                        outcome
                            .errors
                            .push(format!("Part {}: {e}", part.external_ref));
                    }
                }
            }
            written
        }
    };

    outcome.pending = written.iter().filter(|p| p.pending_relation).count() as u64;

    // A part moved to a vehicle we do not know yet loses its old link.
    let pending = written.iter().copied().filter(|p| p.pending_relation);
    for (company_id, refs) in refs_by_company(pending) {
        store.unlink_pending_parts(company_id, &refs).await?;
    }

    let linkable = written.iter().copied().filter(|p| {
        !p.pending_relation && p.external_vehicle_id.is_some_and(|id| index.exists(id))
    });
    for (company_id, refs) in refs_by_company(linkable) {
        store.link_parts(company_id, &refs).await?;
    }
    Ok(outcome)
}

/// Returns whether the part was inserted.
async fn write_part(store: &dyn CatalogStore, part: &NormalizedPart) -> Result<bool, StoreError> {
    let exists = !store
        .existing_part_refs(part.company_id, &[part.external_ref])
        .await?
        .is_empty();
    if exists {
        store.update_part(part).await?;
        Ok(false)
    } else {
        store.insert_part(part).await?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
