//! Import run state machine and progress bookkeeping.
//!
//! States: `pending -> in_progress <-> paused -> completed | partial |
//! failed | cancelled`. Operator actions (pause/resume/cancel) go through
//! [`transition`], which rejects invalid moves with an error naming the
//! current state.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status of an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportRunStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl ImportRunStatus {
    /// Return the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a status string. Returns `None` for unknown values.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// All valid status values.
    pub const ALL: &'static [&'static str] = &[
        "pending",
        "in_progress",
        "paused",
        "completed",
        "partial",
        "failed",
        "cancelled",
    ];

    /// Statuses that still own the entity's cursor.
    pub const ACTIVE: &'static [&'static str] = &["pending", "in_progress", "paused"];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Partial | Self::Failed | Self::Cancelled
        )
    }

    /// Terminal status for a run that consumed every page.
    pub fn finished(error_count: u64) -> Self {
        if error_count == 0 {
            Self::Completed
        } else {
            Self::Partial
        }
    }
}

impl std::fmt::Display for ImportRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Operator actions
// ---------------------------------------------------------------------------

/// Transitions an operator may request on a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAction {
    Pause,
    Resume,
    Cancel,
}

impl RunAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }

    /// Statuses from which this action is accepted.
    pub fn allowed_from(&self) -> &'static [ImportRunStatus] {
        match self {
            Self::Pause => &[ImportRunStatus::InProgress],
            Self::Resume => &[ImportRunStatus::Paused],
            Self::Cancel => &[
                ImportRunStatus::Pending,
                ImportRunStatus::InProgress,
                ImportRunStatus::Paused,
            ],
        }
    }

    /// Status the run ends up in after the action.
    pub fn target(&self) -> ImportRunStatus {
        match self {
            Self::Pause => ImportRunStatus::Paused,
            Self::Resume => ImportRunStatus::InProgress,
            Self::Cancel => ImportRunStatus::Cancelled,
        }
    }
}

impl std::fmt::Display for RunAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate an operator action against the current status and return the
/// resulting status.
pub fn transition(
    current: ImportRunStatus,
    action: RunAction,
) -> Result<ImportRunStatus, CoreError> {
    if action.allowed_from().contains(&current) {
        Ok(action.target())
    } else {
        Err(CoreError::InvalidTransition { action, current })
    }
}

// ---------------------------------------------------------------------------
// Composite run phase
// ---------------------------------------------------------------------------

/// Phase marker stored in `details.phase` for catalog runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogPhase {
    Vehicles,
    Parts,
    Relations,
}

impl CatalogPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vehicles => "vehicles",
            Self::Parts => "parts",
            Self::Relations => "relations",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "vehicles" => Some(Self::Vehicles),
            "parts" => Some(Self::Parts),
            "relations" => Some(Self::Relations),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Cumulative counts for one run. Only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: u64,
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub pending: u64,
    pub deactivated: u64,
    pub errors: u64,
}

impl RunCounts {
    /// Progress as a percentage of the reported total, when one is known.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let pct = self.processed as f64 / self.total as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }

    /// Raise `total` so it never falls behind `processed`.
    pub fn observe_total(&mut self, reported: Option<u64>) {
        if let Some(reported) = reported {
            self.total = self.total.max(reported);
        }
        self.total = self.total.max(self.processed);
    }
}

/// Bounded list of the most recent error messages plus a running count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLog {
    messages: VecDeque<String>,
    capacity: usize,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(128)),
            capacity: capacity.max(1),
        }
    }

    /// Seed from a persisted list, keeping only the newest entries.
    pub fn from_existing(messages: Vec<String>, capacity: usize) -> Self {
        let mut log = Self::new(capacity);
        for m in messages {
            log.push(m);
        }
        log
    }

    pub fn push(&mut self, message: impl Into<String>) {
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message.into());
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.messages.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    // -- Status -------------------------------------------------------------

    #[test]
    fn status_roundtrip() {
        for s in ImportRunStatus::ALL {
            let parsed = ImportRunStatus::from_str(s).unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert_eq!(ImportRunStatus::from_str("running"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!ImportRunStatus::Pending.is_terminal());
        assert!(!ImportRunStatus::Paused.is_terminal());
        assert!(ImportRunStatus::Partial.is_terminal());
        assert!(ImportRunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn finished_status_depends_on_errors() {
        assert_eq!(ImportRunStatus::finished(0), ImportRunStatus::Completed);
        assert_eq!(ImportRunStatus::finished(3), ImportRunStatus::Partial);
    }

    // -- Transitions --------------------------------------------------------

    #[test]
    fn pause_from_completed_is_rejected() {
        let err = transition(ImportRunStatus::Completed, RunAction::Pause).unwrap_err();
        assert_matches!(
            err,
            CoreError::InvalidTransition {
                action: RunAction::Pause,
                current: ImportRunStatus::Completed,
            }
        );
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn resume_from_in_progress_is_rejected() {
        assert!(transition(ImportRunStatus::InProgress, RunAction::Resume).is_err());
    }

    #[test]
    fn cancel_from_paused_succeeds() {
        assert_eq!(
            transition(ImportRunStatus::Paused, RunAction::Cancel).unwrap(),
            ImportRunStatus::Cancelled
        );
    }

    #[test]
    fn cancel_from_terminal_is_rejected() {
        for status in [
            ImportRunStatus::Completed,
            ImportRunStatus::Partial,
            ImportRunStatus::Failed,
            ImportRunStatus::Cancelled,
        ] {
            assert!(transition(status, RunAction::Cancel).is_err());
        }
    }

    #[test]
    fn pause_resume_cycle() {
        let paused = transition(ImportRunStatus::InProgress, RunAction::Pause).unwrap();
        assert_eq!(paused, ImportRunStatus::Paused);
        let resumed = transition(paused, RunAction::Resume).unwrap();
        assert_eq!(resumed, ImportRunStatus::InProgress);
    }

    // -- Counters -----------------------------------------------------------

    #[test]
    fn progress_percent_uses_total() {
        let mut counts = RunCounts {
            processed: 250,
            ..Default::default()
        };
        assert_eq!(counts.progress_percent(), 0.0);
        counts.observe_total(Some(1000));
        assert_eq!(counts.progress_percent(), 25.0);
    }

    #[test]
    fn total_never_trails_processed() {
        let mut counts = RunCounts {
            processed: 1500,
            ..Default::default()
        };
        counts.observe_total(Some(1000));
        assert_eq!(counts.total, 1500);
    }

    // -- ErrorLog -----------------------------------------------------------

    #[test]
    fn error_log_keeps_newest() {
        let mut log = ErrorLog::new(2);
        log.push("a");
        log.push("b");
        log.push("c");
        assert_eq!(log.to_vec(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn error_log_from_existing_truncates() {
        let log = ErrorLog::from_existing(vec!["1".into(), "2".into(), "3".into()], 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.to_vec()[0], "2");
    }
}
