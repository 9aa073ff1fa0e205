//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans [`SyncEvent`]s out to downstream consumers such as the
//! per-vehicle part counter task. Share it as `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use partsync_core::catalog::EntityType;
use partsync_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Dot-separated event names.
pub mod names {
    /// A run left `pending` and started ingesting.
    pub const IMPORT_STARTED: &str = "import.started";
    /// A run reached a terminal status.
    pub const IMPORT_FINISHED: &str = "import.finished";
    /// Per-vehicle part counters need recomputing.
    pub const PART_COUNTERS_STALE: &str = "catalog.part_counters_stale";
    /// Per-vehicle part counters were recomputed.
    pub const PART_COUNTERS_RECOMPUTED: &str = "catalog.part_counters_recomputed";
}

// ---------------------------------------------------------------------------
// SyncEvent
// ---------------------------------------------------------------------------

/// Something that happened during catalog synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Dot-separated event name, see [`names`].
    pub event_type: String,

    /// Entity type the event concerns, if any.
    pub entity_type: Option<EntityType>,

    /// Import run that produced the event, if any.
    pub run_id: Option<DbId>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            entity_type: None,
            run_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the producing run.
    pub fn with_run(mut self, entity_type: EntityType, run_id: DbId) -> Self {
        self.entity_type = Some(entity_type);
        self.run_id = Some(run_id);
        self
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.event_type == name
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Dropped silently when
    /// nobody is subscribed.
    pub fn publish(&self, event: SyncEvent) {
        tracing::debug!(event_type = %event.event_type, run_id = ?event.run_id, "Publishing event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
