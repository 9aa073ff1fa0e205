//! Catalog entity types shared by every layer of the sync engine.
//!
//! Holds the entity/run-mode enums, the canonical records produced by the
//! normalizer, and the pagination cursor.

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ExternalPartRef, ExternalVehicleId, Timestamp};

// ---------------------------------------------------------------------------
// Entity type
// ---------------------------------------------------------------------------

/// What an import run synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Vehicles,
    Parts,
    /// Composite run: vehicles, then parts, then relationship resolution.
    Catalog,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vehicles => "vehicles",
            Self::Parts => "parts",
            Self::Catalog => "catalog",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "vehicles" => Some(Self::Vehicles),
            "parts" => Some(Self::Parts),
            "catalog" | "all" => Some(Self::Catalog),
            _ => None,
        }
    }

    /// All valid entity type values.
    pub const ALL: &'static [&'static str] = &["vehicles", "parts", "catalog"];

    /// Entity types whose runs compete for the same cursor rows.
    pub fn overlapping(&self) -> &'static [&'static str] {
        match self {
            Self::Vehicles => &["vehicles", "catalog"],
            Self::Parts => &["parts", "catalog"],
            Self::Catalog => Self::ALL,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Run mode
// ---------------------------------------------------------------------------

/// Full runs restart from the base date and may reconcile; incremental runs
/// continue from the stored cursor and never reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    Incremental,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            _ => None,
        }
    }

    pub fn from_full_flag(full: bool) -> Self {
        if full {
            Self::Full
        } else {
            Self::Incremental
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Pagination resume point for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Modification-date watermark sent as `fecha`.
    pub since: Timestamp,
    /// Last pagination id sent as `lastid`.
    pub last_id: i64,
}

impl Cursor {
    /// Cursor that replays the whole upstream history.
    pub fn base() -> Self {
        Self::from_date(base_date())
    }

    /// Cursor starting at `since` with no pagination offset.
    pub fn from_date(since: Timestamp) -> Self {
        Self { since, last_id: 0 }
    }
}

/// The date a full import starts from: 1900-01-01T00:00:00Z.
pub fn base_date() -> Timestamp {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Format a timestamp the way the upstream API expects (`dd/mm/yyyy HH:MM:SS`).
pub fn format_upstream_date(ts: &Timestamp) -> String {
    ts.format("%d/%m/%Y %H:%M:%S").to_string()
}

/// Parse an upstream modification date. Accepts the API's own
/// `dd/mm/yyyy HH:MM:SS` format, RFC 3339 and naive ISO-8601.
pub fn parse_upstream_date(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: &[&str] = &[
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%d/%m/%Y", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Canonical records
// ---------------------------------------------------------------------------

/// A vehicle record ready to be written to the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedVehicle {
    pub external_id: ExternalVehicleId,
    pub reference: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
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
    pub modified_at: Option<Timestamp>,
}

impl NormalizedVehicle {
    /// Descriptive fields copied into parts linked to this vehicle.
    pub fn hint(&self) -> VehicleHint {
        VehicleHint {
            make: self.make.clone(),
            model: self.model.clone(),
            trim: self.trim.clone(),
            year: self.year,
            fuel: self.fuel.clone(),
        }
    }
}

/// A part record ready to be written to the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPart {
    pub external_ref: ExternalPartRef,
    pub company_id: i64,
    pub external_vehicle_id: Option<ExternalVehicleId>,
    pub family_code: Option<String>,
    pub family_description: String,
    pub article_code: Option<String>,
    pub title: String,
    pub main_ref: Option<String>,
    pub year_from: i32,
    pub year_to: i32,
    /// Source-formatted price text.
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
    pub pending_relation: bool,
    pub modified_at: Option<Timestamp>,
}

impl NormalizedPart {
    /// Whether the part references a virtual (negative id) vehicle.
    pub fn is_virtual(&self) -> bool {
        self.external_vehicle_id.is_some_and(|id| id < 0)
    }
}

/// Denormalized vehicle fields copied into a part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleHint {
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    pub year: Option<i32>,
    pub fuel: Option<String>,
}

impl VehicleHint {
    pub fn is_empty(&self) -> bool {
        self.make.is_none()
            && self.model.is_none()
            && self.trim.is_none()
            && self.year.is_none()
            && self.fuel.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    // -- EntityType ---------------------------------------------------------

    #[test]
    fn entity_type_roundtrip_and_alias() {
        for s in EntityType::ALL {
            let parsed = EntityType::from_str(s).unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert_eq!(EntityType::from_str("all"), Some(EntityType::Catalog));
        assert_eq!(EntityType::from_str("orders"), None);
    }

    #[test]
    fn catalog_overlaps_everything() {
        assert!(EntityType::Catalog.overlapping().contains(&"vehicles"));
        assert!(EntityType::Parts.overlapping().contains(&"catalog"));
        assert!(!EntityType::Parts.overlapping().contains(&"vehicles"));
    }

    // -- Dates --------------------------------------------------------------

    #[test]
    fn base_cursor_starts_in_1900() {
        let cursor = Cursor::base();
        assert_eq!(cursor.since.year(), 1900);
        assert_eq!(cursor.last_id, 0);
    }

    #[test]
    fn upstream_date_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(format_upstream_date(&ts), "05/03/2024 07:08:09");
    }

    #[test]
    fn parses_known_date_shapes() {
        let a = parse_upstream_date("05/03/2024 07:08:09").unwrap();
        assert_eq!((a.day(), a.month(), a.hour()), (5, 3, 7));

        let b = parse_upstream_date("2024-03-05T07:08:09.123").unwrap();
        assert_eq!(b.second(), 9);

        let c = parse_upstream_date("2024-03-05T07:08:09+02:00").unwrap();
        assert_eq!(c.hour(), 5);

        assert!(parse_upstream_date("not a date").is_none());
        assert!(parse_upstream_date("").is_none());
    }
}
