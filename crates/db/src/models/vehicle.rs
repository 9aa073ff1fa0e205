//! Vehicle rows.

use partsync_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `vehicles` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Vehicle {
    pub id: DbId,
    pub external_id: i64,
    pub reference: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim_level: Option<String>,
    pub year: Option<i32>,
    pub fuel: Option<String>,
    pub vin: Option<String>,
    pub plate: Option<String>,
    pub color: Option<String>,
    pub mileage: Option<i64>,
    pub power: Option<String>,
    pub doors: Option<i32>,
    pub images: Vec<String>,
    pub active: bool,
    pub active_parts_count: i32,
    pub total_parts_count: i32,
    pub source_modified_at: Option<Timestamp>,
    pub last_synced_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Descriptive subset used for part denormalization and link resolution.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct VehicleSummary {
    pub id: DbId,
    pub external_id: i64,
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim_level: Option<String>,
    pub year: Option<i32>,
    pub fuel: Option<String>,
}
