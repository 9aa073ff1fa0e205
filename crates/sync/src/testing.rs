//! In-memory store and scripted source for engine tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use partsync_core::catalog::{Cursor, EntityType, NormalizedPart, NormalizedVehicle};
use partsync_core::envelope::RawPage;
use partsync_core::import_run::ImportRunStatus;
use partsync_core::normalize::is_zero_price;
use partsync_core::types::{DbId, Timestamp};
use partsync_db::models::import_run::{CreateImportRun, ImportRun, RunProgress};
use partsync_db::models::import_schedule::{ImportSchedule, UpsertImportSchedule};
use partsync_db::models::part::PendingPart;
use partsync_db::models::vehicle::VehicleSummary;
use partsync_db::models::vehicle_part::ResolvedLink;
use partsync_db::repositories::part_repo::UpsertedPart;
use partsync_db::repositories::vehicle_repo::UpsertedVehicle;
use partsync_inventory::{CatalogSource, ClientError};
use serde_json::{json, Value};

use crate::error::StoreError;
use crate::store::CatalogStore;

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredVehicle {
    pub id: DbId,
    pub record: NormalizedVehicle,
    pub touched: u32,
    pub active_parts: u64,
}

#[derive(Debug, Clone)]
pub struct StoredPart {
    pub id: DbId,
    pub record: NormalizedPart,
    pub available_in_source: bool,
    pub touched: u32,
}

#[derive(Default)]
struct State {
    next_id: DbId,
    cursors: HashMap<EntityType, (Cursor, u64)>,
    runs: BTreeMap<DbId, ImportRun>,
    vehicles: BTreeMap<i64, StoredVehicle>,
    parts: BTreeMap<(i64, i64), StoredPart>,
    /// part id -> (vehicle id, original external vehicle id)
    links: HashMap<DbId, (DbId, i64)>,
    schedules: BTreeMap<String, ImportSchedule>,
    counter_recomputes: u32,
    fail_bulk: bool,
    rejected_refs: HashSet<i64>,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn vehicle_by_external(&self, external_id: i64) -> Option<&StoredVehicle> {
        self.vehicles.get(&external_id)
    }
}

/// [`CatalogStore`] over plain collections, with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Make every bulk upsert fail so the per-record path runs.
    pub fn fail_bulk_upserts(&self) {
        self.with(|s| s.fail_bulk = true);
    }

    /// Make single-record writes of these refs/ids fail.
    pub fn reject(&self, ids: &[i64]) {
        self.with(|s| s.rejected_refs.extend(ids.iter().copied()));
    }

    pub fn vehicle(&self, external_id: i64) -> Option<StoredVehicle> {
        self.with(|s| s.vehicles.get(&external_id).cloned())
    }

    pub fn part(&self, company_id: i64, external_ref: i64) -> Option<StoredPart> {
        self.with(|s| s.parts.get(&(company_id, external_ref)).cloned())
    }

    pub fn part_count(&self) -> usize {
        self.with(|s| s.parts.len())
    }

    pub fn vehicle_count(&self) -> usize {
        self.with(|s| s.vehicles.len())
    }

    pub fn link_count(&self) -> usize {
        self.with(|s| s.links.len())
    }

    /// Vehicle id linked to a part, if any.
    pub fn linked_vehicle(&self, company_id: i64, external_ref: i64) -> Option<DbId> {
        self.with(|s| {
            let part_id = s.parts.get(&(company_id, external_ref))?.id;
            s.links.get(&part_id).map(|(vehicle_id, _)| *vehicle_id)
        })
    }

    pub fn cursor(&self, entity: EntityType) -> Option<(Cursor, u64)> {
        self.with(|s| s.cursors.get(&entity).copied())
    }

    pub fn counter_recomputes(&self) -> u32 {
        self.with(|s| s.counter_recomputes)
    }

    /// Insert vehicles directly, bypassing the engine.
    pub fn seed_vehicles(&self, vehicles: &[NormalizedVehicle]) {
        self.with(|s| {
            for v in vehicles {
                let id = s.next_id();
                s.vehicles.insert(
                    v.external_id,
                    StoredVehicle {
                        id,
                        record: v.clone(),
                        touched: 0,
                        active_parts: 0,
                    },
                );
            }
        });
    }

    /// Insert parts directly, bypassing the engine.
    pub fn seed_parts(&self, parts: &[NormalizedPart]) {
        self.with(|s| {
            for p in parts {
                let id = s.next_id();
                s.parts.insert(
                    (p.company_id, p.external_ref),
                    StoredPart {
                        id,
                        record: p.clone(),
                        available_in_source: true,
                        touched: 0,
                    },
                );
            }
        });
    }

    /// Overwrite a run's status, as a concurrent operator would.
    pub fn force_status(&self, id: DbId, status: ImportRunStatus) {
        self.with(|s| {
            if let Some(run) = s.runs.get_mut(&id) {
                run.status = status.as_str().to_string();
            }
        });
    }
}

fn apply_progress(run: &mut ImportRun, progress: &RunProgress) {
    let c = &progress.counts;
    let n = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
    run.progress = c.progress_percent();
    run.total_items = n(c.total);
    run.processed_items = n(c.processed);
    run.new_items = n(c.inserted);
    run.updated_items = n(c.updated);
    run.skipped_items = n(c.skipped);
    run.pending_items = n(c.pending);
    run.deactivated_items = n(c.deactivated);
    run.error_count = n(c.errors);
    run.errors = progress.errors.clone();
    run.details = progress.details.clone();
    run.updated_at = Utc::now();
}

fn merge_part(existing: &mut NormalizedPart, incoming: &NormalizedPart) {
    let keep = |new: &Option<String>, old: &Option<String>| new.clone().or_else(|| old.clone());
    let make = keep(&incoming.vehicle_make, &existing.vehicle_make);
    let model = keep(&incoming.vehicle_model, &existing.vehicle_model);
    let trim = keep(&incoming.vehicle_trim, &existing.vehicle_trim);
    let fuel = keep(&incoming.vehicle_fuel, &existing.vehicle_fuel);
    let year = incoming.vehicle_year.or(existing.vehicle_year);
    *existing = incoming.clone();
    existing.vehicle_make = make;
    existing.vehicle_model = model;
    existing.vehicle_trim = trim;
    existing.vehicle_fuel = fuel;
    existing.vehicle_year = year;
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn load_cursor(&self, entity: EntityType) -> Result<Option<Cursor>, StoreError> {
        Ok(self.with(|s| s.cursors.get(&entity).map(|(c, _)| *c)))
    }

    async fn save_cursor(
        &self,
        entity: EntityType,
        cursor: &Cursor,
        processed: u64,
    ) -> Result<(), StoreError> {
        self.with(|s| {
            let entry = s.cursors.entry(entity).or_insert((*cursor, 0));
            entry.0 = *cursor;
            entry.1 += processed;
        });
        Ok(())
    }

    async fn reset_cursor(&self, entity: EntityType, cursor: &Cursor) -> Result<(), StoreError> {
        self.with(|s| {
            let entry = s.cursors.entry(entity).or_insert((*cursor, 0));
            entry.0 = *cursor;
        });
        Ok(())
    }

    async fn create_run(&self, input: &CreateImportRun) -> Result<ImportRun, StoreError> {
        Ok(self.with(|s| {
            let id = s.next_id();
            let now = Utc::now();
            let run = ImportRun {
                id,
                entity_type: input.entity_type.clone(),
                run_mode: input.run_mode.clone(),
                status: ImportRunStatus::Pending.as_str().to_string(),
                progress: 0.0,
                total_items: 0,
                processed_items: 0,
                new_items: 0,
                updated_items: 0,
                skipped_items: 0,
                pending_items: 0,
                deactivated_items: 0,
                error_count: 0,
                errors: vec![],
                from_date: input.from_date,
                details: input.details.clone(),
                started_at: now,
                finished_at: None,
                created_at: now,
                updated_at: now,
            };
            s.runs.insert(id, run.clone());
            run
        }))
    }

    async fn get_run(&self, id: DbId) -> Result<Option<ImportRun>, StoreError> {
        Ok(self.with(|s| s.runs.get(&id).cloned()))
    }

    async fn find_open_run(&self, entity_types: &[&str]) -> Result<Option<ImportRun>, StoreError> {
        Ok(self.with(|s| {
            s.runs
                .values()
                .rev()
                .find(|r| {
                    entity_types.contains(&r.entity_type.as_str()) && !r.status().is_terminal()
                })
                .cloned()
        }))
    }

    async fn runs_with_status(
        &self,
        statuses: &[ImportRunStatus],
    ) -> Result<Vec<ImportRun>, StoreError> {
        Ok(self.with(|s| {
            s.runs
                .values()
                .filter(|r| statuses.contains(&r.status()))
                .cloned()
                .collect()
        }))
    }

    async fn transition_run(
        &self,
        id: DbId,
        from: &[ImportRunStatus],
        to: ImportRunStatus,
    ) -> Result<Option<ImportRun>, StoreError> {
        Ok(self.with(|s| {
            let run = s.runs.get_mut(&id)?;
            if !from.contains(&run.status()) {
                return None;
            }
            run.status = to.as_str().to_string();
            if to.is_terminal() {
                run.finished_at = Some(Utc::now());
            }
            Some(run.clone())
        }))
    }

    async fn update_run_progress(
        &self,
        id: DbId,
        progress: &RunProgress,
    ) -> Result<Option<ImportRun>, StoreError> {
        Ok(self.with(|s| {
            let run = s.runs.get_mut(&id)?;
            if run.status().is_terminal() {
                return None;
            }
            apply_progress(run, progress);
            Some(run.clone())
        }))
    }

    async fn finish_run(
        &self,
        id: DbId,
        from: &[ImportRunStatus],
        status: ImportRunStatus,
        progress: &RunProgress,
    ) -> Result<Option<ImportRun>, StoreError> {
        Ok(self.with(|s| {
            let run = s.runs.get_mut(&id)?;
            if !from.contains(&run.status()) {
                return None;
            }
            apply_progress(run, progress);
            if matches!(status, ImportRunStatus::Completed | ImportRunStatus::Partial) {
                run.progress = 100.0;
            }
            run.status = status.as_str().to_string();
            run.finished_at = Some(Utc::now());
            Some(run.clone())
        }))
    }

    async fn run_history(
        &self,
        entity_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImportRun>, StoreError> {
        Ok(self.with(|s| {
            s.runs
                .values()
                .rev()
                .filter(|r| entity_type.map_or(true, |t| r.entity_type == t))
                .skip(usize::try_from(offset).unwrap_or(0))
                .take(usize::try_from(limit).unwrap_or(0))
                .cloned()
                .collect()
        }))
    }

    async fn count_vehicles(&self) -> Result<i64, StoreError> {
        Ok(self.with(|s| s.vehicles.len() as i64))
    }

    async fn existing_vehicle_ids(&self, external_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        Ok(self.with(|s| {
            external_ids
                .iter()
                .copied()
                .filter(|id| s.vehicles.contains_key(id))
                .collect()
        }))
    }

    async fn vehicle_summaries(
        &self,
        external_ids: &[i64],
    ) -> Result<Vec<VehicleSummary>, StoreError> {
        Ok(self.with(|s| {
            external_ids
                .iter()
                .filter_map(|id| s.vehicle_by_external(*id))
                .map(|v| VehicleSummary {
                    id: v.id,
                    external_id: v.record.external_id,
                    make: v.record.make.clone(),
                    model: v.record.model.clone(),
                    trim_level: v.record.trim.clone(),
                    year: v.record.year,
                    fuel: v.record.fuel.clone(),
                })
                .collect()
        }))
    }

    async fn upsert_vehicles(
        &self,
        vehicles: &[NormalizedVehicle],
    ) -> Result<Vec<UpsertedVehicle>, StoreError> {
        self.with(|s| {
            if s.fail_bulk {
                return Err(StoreError::Backend("bulk upsert rejected".into()));
            }
            Ok(vehicles
                .iter()
                .map(|v| {
                    let inserted = !s.vehicles.contains_key(&v.external_id);
                    if inserted {
                        let id = s.next_id();
                        s.vehicles.insert(
                            v.external_id,
                            StoredVehicle {
                                id,
                                record: v.clone(),
                                touched: 0,
                                active_parts: 0,
                            },
                        );
                    } else if let Some(stored) = s.vehicles.get_mut(&v.external_id) {
                        stored.record = v.clone();
                    }
                    UpsertedVehicle {
                        external_id: v.external_id,
                        inserted,
                    }
                })
                .collect())
        })
    }

    async fn insert_vehicle(&self, vehicle: &NormalizedVehicle) -> Result<(), StoreError> {
        self.with(|s| {
            if s.rejected_refs.contains(&vehicle.external_id) {
                return Err(StoreError::Backend(format!("vehicle {} rejected", vehicle.external_id)));
            }
            let id = s.next_id();
            s.vehicles.insert(
                vehicle.external_id,
                StoredVehicle {
                    id,
                    record: vehicle.clone(),
                    touched: 0,
                    active_parts: 0,
                },
            );
            Ok(())
        })
    }

    async fn update_vehicle(&self, vehicle: &NormalizedVehicle) -> Result<bool, StoreError> {
        self.with(|s| {
            if s.rejected_refs.contains(&vehicle.external_id) {
                return Err(StoreError::Backend(format!("vehicle {} rejected", vehicle.external_id)));
            }
            Ok(match s.vehicles.get_mut(&vehicle.external_id) {
                Some(stored) => {
                    stored.record = vehicle.clone();
                    true
                }
                None => false,
            })
        })
    }

    async fn touch_vehicles(&self, external_ids: &[i64]) -> Result<u64, StoreError> {
        Ok(self.with(|s| {
            let mut n = 0;
            for id in external_ids {
                if let Some(v) = s.vehicles.get_mut(id) {
                    v.touched += 1;
                    n += 1;
                }
            }
            n
        }))
    }

    async fn recompute_part_counters(&self) -> Result<u64, StoreError> {
        Ok(self.with(|s| {
            s.counter_recomputes += 1;
            let mut counts: HashMap<DbId, u64> = HashMap::new();
            for part in s.parts.values() {
                if !part.record.active || is_zero_price(&part.record.price) {
                    continue;
                }
                if let Some((vehicle_id, _)) = s.links.get(&part.id) {
                    *counts.entry(*vehicle_id).or_default() += 1;
                }
            }
            let mut changed = 0;
            for v in s.vehicles.values_mut() {
                let count = counts.get(&v.id).copied().unwrap_or(0);
                if v.active_parts != count {
                    v.active_parts = count;
                    changed += 1;
                }
            }
            changed
        }))
    }

    async fn count_parts(&self, company_id: i64) -> Result<i64, StoreError> {
        Ok(self.with(|s| s.parts.keys().filter(|(c, _)| *c == company_id).count() as i64))
    }

    async fn existing_part_refs(
        &self,
        company_id: i64,
        refs: &[i64],
    ) -> Result<Vec<i64>, StoreError> {
        Ok(self.with(|s| {
            refs.iter()
                .copied()
                .filter(|r| s.parts.contains_key(&(company_id, *r)))
                .collect()
        }))
    }

    async fn upsert_parts(&self, parts: &[NormalizedPart]) -> Result<Vec<UpsertedPart>, StoreError> {
        self.with(|s| {
            if s.fail_bulk {
                return Err(StoreError::Backend("bulk upsert rejected".into()));
            }
            Ok(parts
                .iter()
                .map(|p| {
                    let key = (p.company_id, p.external_ref);
                    let inserted = !s.parts.contains_key(&key);
                    if inserted {
                        let id = s.next_id();
                        s.parts.insert(
                            key,
                            StoredPart {
                                id,
                                record: p.clone(),
                                available_in_source: true,
                                touched: 0,
                            },
                        );
                    } else if let Some(stored) = s.parts.get_mut(&key) {
                        merge_part(&mut stored.record, p);
                        stored.available_in_source = true;
                    }
                    UpsertedPart {
                        external_ref: p.external_ref,
                        inserted,
                    }
                })
                .collect())
        })
    }

    async fn insert_part(&self, part: &NormalizedPart) -> Result<(), StoreError> {
        self.with(|s| {
            if s.rejected_refs.contains(&part.external_ref) {
                return Err(StoreError::Backend(format!("part {} rejected", part.external_ref)));
            }
            let id = s.next_id();
            s.parts.insert(
                (part.company_id, part.external_ref),
                StoredPart {
                    id,
                    record: part.clone(),
                    available_in_source: true,
                    touched: 0,
                },
            );
            Ok(())
        })
    }

    async fn update_part(&self, part: &NormalizedPart) -> Result<bool, StoreError> {
        self.with(|s| {
            if s.rejected_refs.contains(&part.external_ref) {
                return Err(StoreError::Backend(format!("part {} rejected", part.external_ref)));
            }
            Ok(match s.parts.get_mut(&(part.company_id, part.external_ref)) {
                Some(stored) => {
                    merge_part(&mut stored.record, part);
                    stored.available_in_source = true;
                    true
                }
                None => false,
            })
        })
    }

    async fn touch_parts(&self, company_id: i64, refs: &[i64]) -> Result<u64, StoreError> {
        Ok(self.with(|s| {
            let mut n = 0;
            for r in refs {
                if let Some(p) = s.parts.get_mut(&(company_id, *r)) {
                    p.touched += 1;
                    p.available_in_source = true;
                    n += 1;
                }
            }
            n
        }))
    }

    async fn link_parts(&self, company_id: i64, refs: &[i64]) -> Result<u64, StoreError> {
        Ok(self.with(|s| {
            let mut changed = 0;
            for r in refs {
                let Some(part) = s.parts.get(&(company_id, *r)) else {
                    continue;
                };
                let Some(vehicle_external) = part.record.external_vehicle_id else {
                    continue;
                };
                let Some(vehicle) = s.vehicles.get(&vehicle_external) else {
                    continue;
                };
                let link = (vehicle.id, vehicle_external);
                if s.links.get(&part.id) != Some(&link) {
                    s.links.insert(part.id, link);
                    changed += 1;
                }
            }
            changed
        }))
    }

    async fn unlink_pending_parts(
        &self,
        company_id: i64,
        refs: &[i64],
    ) -> Result<u64, StoreError> {
        Ok(self.with(|s| {
            let mut removed = 0;
            for r in refs {
                let Some(part) = s.parts.get(&(company_id, *r)) else {
                    continue;
                };
                if part.record.pending_relation && s.links.remove(&part.id).is_some() {
                    removed += 1;
                }
            }
            removed
        }))
    }

    async fn pending_parts(
        &self,
        after_id: DbId,
        limit: i64,
    ) -> Result<Vec<PendingPart>, StoreError> {
        Ok(self.with(|s| {
            let mut pending: Vec<PendingPart> = s
                .parts
                .values()
                .filter(|p| p.id > after_id && p.record.pending_relation)
                .filter_map(|p| {
                    Some(PendingPart {
                        id: p.id,
                        external_ref: p.record.external_ref,
                        external_vehicle_id: p.record.external_vehicle_id?,
                        title: p.record.title.clone(),
                        price: p.record.price.clone(),
                        source_status: p.record.source_status.clone(),
                    })
                })
                .collect();
            pending.sort_by_key(|p| p.id);
            pending.truncate(usize::try_from(limit).unwrap_or(0));
            pending
        }))
    }

    async fn resolve_links(&self, links: &[ResolvedLink]) -> Result<u64, StoreError> {
        Ok(self.with(|s| {
            let mut resolved = 0;
            for link in links {
                let Some(vehicle) = s
                    .vehicles
                    .values()
                    .find(|v| v.id == link.vehicle_id)
                    .map(|v| v.record.clone())
                else {
                    continue;
                };
                let Some(part) = s.parts.values_mut().find(|p| p.id == link.part_id) else {
                    continue;
                };
                let p = &mut part.record;
                p.pending_relation = false;
                p.active = link.active;
                p.vehicle_make = p.vehicle_make.take().or(vehicle.make);
                p.vehicle_model = p.vehicle_model.take().or(vehicle.model);
                p.vehicle_trim = p.vehicle_trim.take().or(vehicle.trim);
                p.vehicle_year = p.vehicle_year.or(vehicle.year);
                p.vehicle_fuel = p.vehicle_fuel.take().or(vehicle.fuel);
                s.links
                    .insert(link.part_id, (link.vehicle_id, link.external_vehicle_id));
                resolved += 1;
            }
            resolved
        }))
    }

    async fn active_available_refs(&self, company_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self.with(|s| {
            s.parts
                .values()
                .filter(|p| {
                    p.record.company_id == company_id && p.record.active && p.available_in_source
                })
                .map(|p| p.record.external_ref)
                .collect()
        }))
    }

    async fn mark_unavailable(&self, company_id: i64, refs: &[i64]) -> Result<u64, StoreError> {
        Ok(self.with(|s| {
            let mut n = 0;
            for r in refs {
                if let Some(p) = s.parts.get_mut(&(company_id, *r)) {
                    if p.available_in_source {
                        p.available_in_source = false;
                        n += 1;
                    }
                }
            }
            n
        }))
    }

    async fn due_schedules(&self, now: Timestamp) -> Result<Vec<ImportSchedule>, StoreError> {
        Ok(self.with(|s| {
            s.schedules
                .values()
                .filter(|sc| sc.active && sc.next_run_at.map_or(true, |t| t <= now))
                .cloned()
                .collect()
        }))
    }

    async fn mark_schedule_run(
        &self,
        id: DbId,
        last_run_at: Timestamp,
        next_run_at: Timestamp,
    ) -> Result<(), StoreError> {
        self.with(|s| {
            if let Some(sc) = s.schedules.values_mut().find(|sc| sc.id == id) {
                sc.last_run_at = Some(last_run_at);
                sc.next_run_at = Some(next_run_at);
            }
        });
        Ok(())
    }

    async fn seed_schedule(
        &self,
        input: &UpsertImportSchedule,
        next_run_at: Timestamp,
    ) -> Result<bool, StoreError> {
        Ok(self.with(|s| {
            if s.schedules.contains_key(&input.entity_type) {
                return false;
            }
            let id = s.next_id();
            let now = Utc::now();
            s.schedules.insert(
                input.entity_type.clone(),
                ImportSchedule {
                    id,
                    entity_type: input.entity_type.clone(),
                    frequency: input.frequency.clone(),
                    full_import: input.full_import,
                    active: input.active,
                    last_run_at: None,
                    next_run_at: Some(next_run_at),
                    created_at: now,
                    updated_at: now,
                },
            );
            true
        }))
    }
}

impl MemoryStore {
    pub fn schedule(&self, entity_type: &str) -> Option<ImportSchedule> {
        self.with(|s| s.schedules.get(entity_type).cloned())
    }
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// One scripted response.
pub enum Step {
    Page(RawPage),
    Fail(ClientError),
}

/// [`CatalogSource`] replaying a fixed script per entity type. Once a
/// script runs out, every call returns an empty page.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<EntityType, VecDeque<Step>>>,
    calls: Mutex<Vec<(EntityType, Cursor)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entity: EntityType, step: Step) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(entity)
            .or_default()
            .push_back(step);
        self
    }

    pub fn page(&self, entity: EntityType, page: RawPage) -> &Self {
        self.push(entity, Step::Page(page))
    }

    pub fn fail(&self, entity: EntityType, err: ClientError) -> &Self {
        self.push(entity, Step::Fail(err))
    }

    /// Cursors sent so far, in call order.
    pub fn calls(&self) -> Vec<(EntityType, Cursor)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, entity: EntityType) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == entity)
            .count()
    }
}

#[async_trait]
impl CatalogSource for ScriptedSource {
    async fn fetch_batch(
        &self,
        entity: EntityType,
        cursor: &Cursor,
        _page_size: u32,
    ) -> Result<RawPage, ClientError> {
        self.calls.lock().unwrap().push((entity, *cursor));
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&entity)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Step::Page(page)) => Ok(page),
            Some(Step::Fail(err)) => Err(err),
            None => Ok(RawPage::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const COMPANY: i64 = 1;

pub fn raw_vehicle(id: i64) -> Value {
    json!({
        "idLocal": id,
        "codigo": format!("V-{id}"),
        "nombreMarca": "SEAT",
        "nombreModelo": "IBIZA",
        "anyoVehiculo": 2008,
        "combustible": "Diesel",
    })
}

pub fn raw_part(reference: i64, vehicle_id: i64, price: &str) -> Value {
    json!({
        "refLocal": reference,
        "idEmpresa": COMPANY,
        "idVehiculo": vehicle_id,
        "descripcionFamilia": "Carroceria",
        "descripcionArticulo": "Faro delantero",
        "precio": price,
    })
}

pub fn vehicle_page(ids: impl IntoIterator<Item = i64>) -> RawPage {
    RawPage {
        records: ids.into_iter().map(raw_vehicle).collect(),
        ..Default::default()
    }
}

/// Parts referencing no vehicle, priced 10.
pub fn part_page(refs: impl IntoIterator<Item = i64>) -> RawPage {
    RawPage {
        records: refs
            .into_iter()
            .map(|r| json!({"refLocal": r, "idEmpresa": COMPANY, "descripcionArticulo": "Faro delantero", "precio": "10"}))
            .collect(),
        ..Default::default()
    }
}

pub fn vehicle(id: i64) -> NormalizedVehicle {
    partsync_core::normalize::normalize_vehicle(&raw_vehicle(id)).unwrap()
}

pub fn part(reference: i64, vehicle_id: i64, price: &str, vehicle_exists: bool) -> NormalizedPart {
    partsync_core::normalize::normalize_part(
        &raw_part(reference, vehicle_id, price),
        COMPANY,
        vehicle_exists,
        None,
    )
    .unwrap()
}
