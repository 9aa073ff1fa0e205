//! Resolved part-to-vehicle associations.

use partsync_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `vehicle_parts` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct VehiclePart {
    pub id: DbId,
    pub vehicle_id: DbId,
    pub part_id: DbId,
    pub original_vehicle_id: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One pending part to link, with its activation already decided.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedLink {
    pub part_id: DbId,
    pub vehicle_id: DbId,
    pub external_vehicle_id: i64,
    pub active: bool,
}
