//! Normalization of raw upstream records into canonical catalog records.
//!
//! Pure functions, no I/O. Field names have drifted across upstream API
//! versions, so every field is read from a list of key variants and the
//! first non-empty value wins.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::brands;
use crate::catalog::{parse_upstream_date, NormalizedPart, NormalizedVehicle, VehicleHint};
use crate::envelope::{as_i64, MODIFIED_KEYS};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Image used when a record carries no image at all.
pub const PLACEHOLDER_IMAGE: &str = "https://via.placeholder.com/150?text=Sin+Imagen";

/// Family description used when the record has none.
pub const DEFAULT_FAMILY_DESCRIPTION: &str = "General";

/// Source status used when the record has none.
pub const DEFAULT_SOURCE_STATUS: &str = "almacenada";

/// Compatibility range used when the record has none.
pub const DEFAULT_YEAR_FROM: i32 = 2000;
pub const DEFAULT_YEAR_TO: i32 = 2050;

/// Article descriptions shorter than this get a synthetic title.
pub const MIN_TITLE_LENGTH: usize = 3;

/// Source statuses meaning the part left the inventory.
const SOLD_MARKERS: &[&str] = &[
    "vendida", "vendido", "baja", "eliminada", "eliminado", "sold", "removed",
];

/// Title fragments marking a part whose vehicle was never identified.
const UNIDENTIFIED_MARKERS: &[&str] = &["no identificado", "no identificada"];

/// Prices at or above this value are minor units.
const MINOR_UNITS_THRESHOLD: i64 = 100;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A single raw record could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record is missing required field '{0}'")]
    MissingField(&'static str),
}

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

fn object(raw: &Value) -> Result<&Map<String, Value>, NormalizationError> {
    raw.as_object().ok_or(NormalizationError::NotAnObject)
}

/// First non-empty string value among `keys`. Numbers are stringified.
pub fn first_str(raw: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match raw.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First integer value among `keys`.
pub fn first_i64(raw: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| raw.get(*k).and_then(as_i64))
}

fn first_i32(raw: &Map<String, Value>, keys: &[&str]) -> Option<i32> {
    first_i64(raw, keys).and_then(|v| i32::try_from(v).ok())
}

fn modified_at(raw: &Map<String, Value>) -> Option<Timestamp> {
    first_str(raw, MODIFIED_KEYS).and_then(|s| parse_upstream_date(&s))
}

/// Normalize an image field that may be an array, a single string, or
/// absent. Always returns at least one entry.
pub fn normalize_images(raw: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    let images: Vec<String> = keys
        .iter()
        .find_map(|k| match raw.get(*k)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            ),
            Value::String(s) => Some(
                s.split([',', ';'])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_default();

    if images.is_empty() {
        vec![PLACEHOLDER_IMAGE.to_string()]
    } else {
        images
    }
}

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

fn parse_decimal(text: &str) -> Option<Decimal> {
    let cleaned = text.trim().replace(',', ".");
    Decimal::from_str(&cleaned).ok()
}

/// Normalize a source price.
///
/// Values at or above 100 are minor units and are divided by 100 with two
/// decimals (`"150"` becomes `"1.50"`). Smaller values keep the source
/// text. Missing or unparseable prices become `"0"`.
pub fn normalize_price(raw: Option<&str>) -> String {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return "0".to_string();
    };
    let Some(value) = parse_decimal(text) else {
        return "0".to_string();
    };
    if value >= Decimal::from(MINOR_UNITS_THRESHOLD) {
        let mut major = value / Decimal::from(100);
        major.rescale(2);
        major.to_string()
    } else {
        text.to_string()
    }
}

/// Whether a stored price text means "no price". Unparseable text counts
/// as zero.
pub fn is_zero_price(price: &str) -> bool {
    parse_decimal(price).map_or(true, |d| d.is_zero())
}

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

/// Why a part ended up active or inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Source status says sold or removed.
    Sold,
    /// Title carries an "unidentified" marker.
    Unidentified,
    /// Virtual vehicle: never deactivated for missing-vehicle reasons.
    VirtualVehicle,
    /// Decided by price alone.
    Priced,
    /// Physical vehicle not in the local store yet.
    AwaitingVehicle,
    /// Price is zero.
    ZeroPrice,
}

/// Decide whether a part is active.
///
/// Rules apply in order, first match wins: sold status, unidentified
/// title, virtual vehicle, price. A part pointing at a physical vehicle
/// that does not exist yet is inactive, and a zero price always forces
/// inactive.
pub fn decide_activation(
    source_status: &str,
    title: &str,
    vehicle_id: Option<i64>,
    vehicle_exists: bool,
    price: &str,
) -> (bool, Activation) {
    let status = source_status.to_lowercase();
    if SOLD_MARKERS.iter().any(|m| status.contains(m)) {
        return (false, Activation::Sold);
    }

    let title = title.to_lowercase();
    if UNIDENTIFIED_MARKERS.iter().any(|m| title.contains(m)) {
        return (false, Activation::Unidentified);
    }

    let zero = is_zero_price(price);
    if vehicle_id.is_some_and(|id| id < 0) {
        return if zero {
            (false, Activation::ZeroPrice)
        } else {
            (true, Activation::VirtualVehicle)
        };
    }

    if zero {
        return (false, Activation::ZeroPrice);
    }
    if vehicle_id.is_some_and(|id| id > 0) && !vehicle_exists {
        return (false, Activation::AwaitingVehicle);
    }
    (true, Activation::Priced)
}

// ---------------------------------------------------------------------------
// Vehicles
// ---------------------------------------------------------------------------

const VEHICLE_ID: &[&str] = &["idLocal", "IdLocal", "id", "Id"];
const VEHICLE_MAKE: &[&str] = &["nombreMarca", "marca", "Marca", "brand"];
const VEHICLE_MODEL: &[&str] = &["nombreModelo", "modelo", "Modelo", "model"];
const VEHICLE_TRIM: &[&str] = &["nombreVersion", "codVersion", "version", "Version"];
const VEHICLE_YEAR: &[&str] = &["anyoVehiculo", "AnyoVehiculo", "anyo", "Anyo", "year"];
const VEHICLE_FUEL: &[&str] = &["combustible", "Combustible", "fuel"];
const VEHICLE_IMAGES: &[&str] = &["imagenes", "UrlsImgs", "urlsImgs", "Imagenes"];

/// Normalize a raw vehicle record.
pub fn normalize_vehicle(raw: &Value) -> Result<NormalizedVehicle, NormalizationError> {
    let raw = object(raw)?;
    let external_id =
        first_i64(raw, VEHICLE_ID).ok_or(NormalizationError::MissingField("idLocal"))?;

    Ok(NormalizedVehicle {
        external_id,
        reference: first_str(raw, &["codigo", "Codigo"])
            .unwrap_or_else(|| format!("REF-{external_id}")),
        make: first_str(raw, VEHICLE_MAKE),
        model: first_str(raw, VEHICLE_MODEL),
        trim: first_str(raw, VEHICLE_TRIM),
        year: first_i32(raw, VEHICLE_YEAR).filter(|y| *y > 0),
        fuel: first_str(raw, VEHICLE_FUEL),
        vin: first_str(raw, &["bastidor", "Bastidor", "vin"]),
        plate: first_str(raw, &["matricula", "Matricula"]),
        color: first_str(raw, &["color", "Color"]),
        mileage: first_i64(raw, &["kilometraje", "Kilometraje", "km"]),
        power: first_str(raw, &["potenciaHP", "potenciaKW", "Potencia", "potencia"]),
        doors: first_i32(raw, &["puertas", "Puertas"]),
        images: normalize_images(raw, VEHICLE_IMAGES),
        active: true,
        modified_at: modified_at(raw),
    })
}

// ---------------------------------------------------------------------------
// Parts
// ---------------------------------------------------------------------------

const PART_REF: &[&str] = &["refLocal", "RefLocal", "idLocal", "id"];
const PART_COMPANY: &[&str] = &["idEmpresa", "IdEmpresa"];
const PART_VEHICLE: &[&str] = &["idVehiculo", "IdVehiculo"];
const PART_FAMILY_CODE: &[&str] = &["codFamilia", "familia", "CodFamilia"];
const PART_FAMILY_DESC: &[&str] = &["descripcionFamilia", "DescripcionFamilia"];
const PART_ARTICLE_CODE: &[&str] = &["codArticulo", "CodArticulo"];
const PART_ARTICLE_DESC: &[&str] = &["descripcionArticulo", "descripcion", "DescripcionArticulo"];
const PART_PRICE: &[&str] = &["precio", "Precio", "price"];
const PART_STATUS: &[&str] = &["situacion", "Situacion"];
const PART_IMAGES: &[&str] = &["imagenes", "UrlsImgs", "urlsImgs", "Imagenes"];

/// Normalize a raw part record.
///
/// `vehicle_exists` says whether the referenced vehicle is already in the
/// local store. `hint` carries vehicle descriptive fields from a companion
/// record or the store; without one, parts of virtual vehicles fall back to
/// the brand heuristic.
pub fn normalize_part(
    raw: &Value,
    default_company_id: i64,
    vehicle_exists: bool,
    hint: Option<&VehicleHint>,
) -> Result<NormalizedPart, NormalizationError> {
    let raw = object(raw)?;
    let external_ref =
        first_i64(raw, PART_REF).ok_or(NormalizationError::MissingField("refLocal"))?;
    let external_vehicle_id = first_i64(raw, PART_VEHICLE).filter(|id| *id != 0);

    let family_description = first_str(raw, PART_FAMILY_DESC)
        .unwrap_or_else(|| DEFAULT_FAMILY_DESCRIPTION.to_string());
    let article_description = first_str(raw, PART_ARTICLE_DESC).unwrap_or_default();
    let title = if article_description.chars().count() < MIN_TITLE_LENGTH {
        format!("Pieza ID {external_ref}")
    } else {
        article_description.clone()
    };
    let notes = first_str(raw, &["observaciones", "Observaciones"]);
    let price = normalize_price(first_str(raw, PART_PRICE).as_deref());
    let source_status =
        first_str(raw, PART_STATUS).unwrap_or_else(|| DEFAULT_SOURCE_STATUS.to_string());

    let (active, _) =
        decide_activation(&source_status, &title, external_vehicle_id, vehicle_exists, &price);

    let vehicle = match hint {
        Some(h) if !h.is_empty() => h.clone(),
        _ if external_vehicle_id.is_some_and(|id| id < 0) => {
            let text = format!(
                "{family_description} {article_description} {}",
                notes.as_deref().unwrap_or_default()
            );
            brands::detect(&text)
                .map(|m| VehicleHint {
                    make: Some(m.make),
                    model: m.model,
                    ..Default::default()
                })
                .unwrap_or_default()
        }
        _ => VehicleHint::default(),
    };

    Ok(NormalizedPart {
        external_ref,
        company_id: first_i64(raw, PART_COMPANY).unwrap_or(default_company_id),
        external_vehicle_id,
        family_code: first_str(raw, PART_FAMILY_CODE),
        family_description,
        article_code: first_str(raw, PART_ARTICLE_CODE),
        title,
        main_ref: first_str(raw, &["refPrincipal", "RefPrincipal"]),
        year_from: first_i32(raw, &["anyoInicio", "AnyoInicio"])
            .filter(|y| *y > 0)
            .unwrap_or(DEFAULT_YEAR_FROM),
        year_to: first_i32(raw, &["anyoFin", "AnyoFin"])
            .filter(|y| *y > 0)
            .unwrap_or(DEFAULT_YEAR_TO),
        price,
        weight: first_str(raw, &["peso", "Peso"]),
        notes,
        source_status,
        images: normalize_images(raw, PART_IMAGES),
        vehicle_make: vehicle.make,
        vehicle_model: vehicle.model,
        vehicle_trim: vehicle.trim,
        vehicle_year: vehicle.year,
        vehicle_fuel: vehicle.fuel,
        active,
        pending_relation: external_vehicle_id.is_some() && !vehicle_exists,
        modified_at: modified_at(raw),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
