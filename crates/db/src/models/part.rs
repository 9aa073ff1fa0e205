//! Part rows.

use partsync_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `parts` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Part {
    pub id: DbId,
    pub external_ref: i64,
    pub company_id: i64,
    pub external_vehicle_id: Option<i64>,
    pub family_code: Option<String>,
    pub family_description: String,
    pub article_code: Option<String>,
    pub title: String,
    pub main_ref: Option<String>,
    pub year_from: i32,
    pub year_to: i32,
    pub price: String,
    pub weight: Option<String>,
    pub notes: Option<String>,
    pub source_status: String,
    pub images: Vec<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_trim: Option<String>,
    pub vehicle_year: Option<i32>,
    pub vehicle_fuel: Option<String>,
    pub active: bool,
    pub available_in_source: bool,
    pub pending_relation: bool,
    pub source_modified_at: Option<Timestamp>,
    pub last_confirmed_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A part waiting for its vehicle to arrive.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PendingPart {
    pub id: DbId,
    pub external_ref: i64,
    pub external_vehicle_id: i64,
    pub title: String,
    pub price: String,
    pub source_status: String,
}
