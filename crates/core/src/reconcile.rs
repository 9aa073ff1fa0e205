//! Drift detection between the local catalog and the upstream id set.
//!
//! Given the refs of locally active parts and the full set of refs seen
//! upstream during a full import, decide which parts to flag as no longer
//! available in the source. When more than the configured share of active
//! parts would be flagged, nothing is flagged: such a gap points at an
//! incomplete remote fetch, not a mass removal.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::ExternalPartRef;

/// Outcome of planning a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcilePlan {
    /// The remote set is empty; there is nothing trustworthy to compare.
    Skipped { reason: String },
    /// Too many active parts are missing upstream. Nothing is flagged.
    GuardTripped {
        missing: usize,
        active: usize,
        percent: f64,
        threshold_percent: f64,
    },
    /// Flag exactly these refs as unavailable in the source.
    Flag {
        refs: Vec<ExternalPartRef>,
        active: usize,
        percent: f64,
    },
}

impl ReconcilePlan {
    /// Refs to flag; empty unless the plan is [`ReconcilePlan::Flag`].
    pub fn refs(&self) -> &[ExternalPartRef] {
        match self {
            Self::Flag { refs, .. } => refs,
            _ => &[],
        }
    }
}

/// Plan a reconciliation pass.
///
/// `active_local` are the refs of parts that are both active and marked
/// available in the source. The guard trips when the missing share is
/// strictly greater than `threshold_percent`.
pub fn plan(
    active_local: &[ExternalPartRef],
    remote: &HashSet<ExternalPartRef>,
    threshold_percent: f64,
) -> ReconcilePlan {
    if remote.is_empty() {
        return ReconcilePlan::Skipped {
            reason: "remote id set is empty".to_string(),
        };
    }

    let mut missing: Vec<ExternalPartRef> = active_local
        .iter()
        .copied()
        .filter(|r| !remote.contains(r))
        .collect();
    missing.sort_unstable();
    missing.dedup();

    let active = active_local.len();
    let percent = if active == 0 {
        0.0
    } else {
        missing.len() as f64 / active as f64 * 100.0
    };

    if percent > threshold_percent {
        return ReconcilePlan::GuardTripped {
            missing: missing.len(),
            active,
            percent,
            threshold_percent,
        };
    }

    ReconcilePlan::Flag {
        refs: missing,
        active,
        percent,
    }
}
