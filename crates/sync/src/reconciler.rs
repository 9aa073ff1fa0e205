//! Post-import drift detection.
//!
//! After a full parts run the set of refs seen upstream is compared with
//! the locally active parts. Parts missing upstream are flagged as no
//! longer available in the source unless the safety guard trips.

use std::collections::HashSet;
use std::time::Duration;

use partsync_core::catalog::{Cursor, EntityType};
use partsync_core::config::SyncConfig;
use partsync_core::envelope::{next_cursor_id, record_id, PART_ID_KEYS};
use partsync_core::reconcile::{self, ReconcilePlan};
use partsync_inventory::{CatalogSource, ClientError};

use crate::error::{StoreError, SyncError};
use crate::store::CatalogStore;

/// Refs flagged per `UPDATE`.
pub const FLAG_CHUNK: usize = 1000;

/// Page cap of a remote id sweep.
pub const MAX_SWEEP_PAGES: u32 = 200;

/// Consecutive empty pages that end a sweep.
pub const MAX_SWEEP_EMPTY_PAGES: u32 = 2;

/// Consecutive failed pages that abort a sweep.
pub const MAX_SWEEP_FAILURES: u32 = 3;

/// Why a remote id sweep produced no usable ref set.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The page cap ended the sweep before upstream reported the end.
    #[error("Remote id sweep truncated after {pages} pages")]
    Truncated { pages: u32 },
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    pub plan: ReconcilePlan,
    pub flagged: u64,
}

impl ReconcileReport {
    /// Warning to attach to the run, if the pass did not flag normally.
    pub fn warning(&self) -> Option<String> {
        match &self.plan {
            ReconcilePlan::GuardTripped {
                missing,
                active,
                percent,
                threshold_percent,
            } => Some(
                SyncError::SafetyGuardTripped {
                    missing: *missing,
                    active: *active,
                    percent: *percent,
                    threshold_percent: *threshold_percent,
                }
                .to_string(),
            ),
            ReconcilePlan::Skipped { reason } => Some(format!("Reconciliation skipped: {reason}")),
            ReconcilePlan::Flag { .. } => None,
        }
    }

    /// Compact summary stored in the run details.
    pub fn summary(&self) -> serde_json::Value {
        match &self.plan {
            ReconcilePlan::Flag {
                active, percent, ..
            } => serde_json::json!({
                "outcome": "flagged",
                "flagged": self.flagged,
                "active": active,
                "percent": percent,
            }),
            ReconcilePlan::GuardTripped {
                missing,
                active,
                percent,
                ..
            } => serde_json::json!({
                "outcome": "guard_tripped",
                "missing": missing,
                "active": active,
                "percent": percent,
            }),
            ReconcilePlan::Skipped { reason } => serde_json::json!({
                "outcome": "skipped",
                "reason": reason,
            }),
        }
    }
}

/// Compare `remote` with the company's active, available parts and flag
/// the missing ones.
pub async fn reconcile(
    store: &dyn CatalogStore,
    company_id: i64,
    remote: &HashSet<i64>,
    threshold_percent: f64,
) -> Result<ReconcileReport, StoreError> {
    let active = store.active_available_refs(company_id).await?;
    let plan = reconcile::plan(&active, remote, threshold_percent);

    let mut flagged = 0;
    match &plan {
        ReconcilePlan::Flag { refs, percent, .. } => {
            for chunk in refs.chunks(FLAG_CHUNK) {
                flagged += store.mark_unavailable(company_id, chunk).await?;
            }
            tracing::info!(
                flagged,
                active = active.len(),
                percent = *percent,
                "Flagged parts missing upstream",
            );
        }
        ReconcilePlan::GuardTripped {
            missing, percent, ..
        } => {
            tracing::warn!(
                missing = *missing,
                active = active.len(),
                percent = *percent,
                threshold_percent,
                "Reconciliation safety guard tripped, nothing flagged",
            );
        }
        ReconcilePlan::Skipped { reason } => {
            tracing::warn!(%reason, "Reconciliation skipped");
        }
    }

    Ok(ReconcileReport { plan, flagged })
}

/// Rebuild the full upstream ref set by paging the parts endpoint from the
/// beginning and keeping only the ids.
///
/// Stops on an explicit end-of-data flag or after [`MAX_SWEEP_EMPTY_PAGES`]
/// consecutive empty pages. Fails after [`MAX_SWEEP_FAILURES`] consecutive
/// errors, on a configuration error, or when [`MAX_SWEEP_PAGES`] is hit
/// before the end of data.
pub async fn sweep_remote_refs(
    source: &dyn CatalogSource,
    config: &SyncConfig,
    failure_delay: Duration,
) -> Result<HashSet<i64>, SweepError> {
    let page_size = config.page_size;
    let mut cursor = Cursor::base();
    let mut refs = HashSet::new();
    let mut empty_pages = 0;
    let mut failures = 0;
    let mut reached_end = false;

    for page_no in 1..=MAX_SWEEP_PAGES {
        let page = match source.fetch_batch(EntityType::Parts, &cursor, page_size).await {
            Ok(page) => {
                failures = 0;
                page
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                failures += 1;
                tracing::warn!(page_no, failures, error = %e, "Remote id sweep page failed");
                if failures >= MAX_SWEEP_FAILURES {
                    return Err(e.into());
                }
                cursor.last_id += i64::from(page_size);
                tokio::time::sleep(failure_delay).await;
                continue;
            }
        };

        if page.is_empty() {
            empty_pages += 1;
            if empty_pages >= MAX_SWEEP_EMPTY_PAGES || page.more == Some(false) {
                reached_end = true;
                break;
            }
            cursor.last_id += i64::from(page_size);
            continue;
        }
        empty_pages = 0;

        refs.extend(page.records.iter().filter_map(|r| record_id(r, PART_ID_KEYS)));
        if page.more == Some(false) {
            reached_end = true;
            break;
        }
        cursor.last_id = next_cursor_id(&page, EntityType::Parts, cursor.last_id, page_size);
    }

    if !reached_end {
        tracing::warn!(refs = refs.len(), pages = MAX_SWEEP_PAGES, "Remote id sweep hit its page cap");
        return Err(SweepError::Truncated {
            pages: MAX_SWEEP_PAGES,
        });
    }

    tracing::info!(refs = refs.len(), "Remote id sweep finished");
    Ok(refs)
}
