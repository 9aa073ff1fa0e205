//! Response envelope probing and pagination rules.
//!
//! The upstream API has shipped several response shapes over time. Each
//! entity type has an ordered list of [`ExtractionRule`]s; the first rule
//! whose path resolves to an array accepted by its predicate wins. An
//! unrecognized document yields an empty page instead of an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{parse_upstream_date, EntityType};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Extraction rules
// ---------------------------------------------------------------------------

/// Where an extraction rule looks for the record array.
#[derive(Debug, Clone, Copy)]
pub enum RulePath {
    /// The document itself is an array.
    Root,
    /// Dotted object path, e.g. `data.piezas`.
    Key(&'static str),
    /// First array-valued property of the object at `parent` (dotted path,
    /// empty for the root), ignoring the `skip` keys.
    FirstArray {
        parent: &'static str,
        skip: &'static [&'static str],
    },
}

/// Decides whether a candidate array is the record list.
pub type Predicate = fn(&[Value]) -> bool;

/// One `(path, predicate)` pair.
#[derive(Clone, Copy)]
pub struct ExtractionRule {
    pub path: RulePath,
    pub accept: Predicate,
}

fn any_array(_: &[Value]) -> bool {
    true
}

fn non_empty(items: &[Value]) -> bool {
    !items.is_empty()
}

const fn key(path: &'static str) -> ExtractionRule {
    ExtractionRule {
        path: RulePath::Key(path),
        accept: any_array,
    }
}

/// Keys that hold companion records rather than the page's own records.
const COMPANION_KEYS: &[&str] = &["vehiculos", "result_set", "paginacion"];

/// Envelope shapes seen on the vehicles endpoint, most specific first.
pub const VEHICLE_RULES: &[ExtractionRule] = &[
    key("data.vehiculos"),
    key("vehiculos"),
    key("data.items"),
    key("items"),
    key("elements"),
    key("data"),
    ExtractionRule {
        path: RulePath::Root,
        accept: any_array,
    },
    ExtractionRule {
        path: RulePath::FirstArray {
            parent: "",
            skip: &["result_set", "paginacion"],
        },
        accept: non_empty,
    },
];

/// Envelope shapes seen on the parts endpoint, most specific first.
pub const PART_RULES: &[ExtractionRule] = &[
    key("data.piezas"),
    key("piezas"),
    key("data.items"),
    key("items"),
    key("elements"),
    key("data"),
    key("Partes"),
    key("data.Partes"),
    key("canal.piezas"),
    ExtractionRule {
        path: RulePath::Root,
        accept: any_array,
    },
    ExtractionRule {
        path: RulePath::FirstArray {
            parent: "",
            skip: COMPANION_KEYS,
        },
        accept: non_empty,
    },
    ExtractionRule {
        path: RulePath::FirstArray {
            parent: "data",
            skip: COMPANION_KEYS,
        },
        accept: non_empty,
    },
];

/// Vehicle records embedded in a parts page.
pub const COMPANION_VEHICLE_RULES: &[ExtractionRule] =
    &[key("vehiculos"), key("data.vehiculos")];

/// Rules for the given entity type.
pub fn rules_for(entity: EntityType) -> &'static [ExtractionRule] {
    match entity {
        EntityType::Vehicles => VEHICLE_RULES,
        EntityType::Parts | EntityType::Catalog => PART_RULES,
    }
}

fn lookup<'a>(doc: &'a Value, dotted: &str) -> Option<&'a Value> {
    if dotted.is_empty() {
        return Some(doc);
    }
    dotted
        .split('.')
        .try_fold(doc, |node, segment| node.as_object()?.get(segment))
}

fn resolve<'a>(doc: &'a Value, path: &RulePath) -> Option<&'a Vec<Value>> {
    match path {
        RulePath::Root => doc.as_array(),
        RulePath::Key(dotted) => lookup(doc, dotted)?.as_array(),
        RulePath::FirstArray { parent, skip } => lookup(doc, parent)?
            .as_object()?
            .iter()
            .filter(|(k, _)| !skip.iter().any(|s| *s == k.as_str()))
            .find_map(|(_, v)| v.as_array().filter(|a| !a.is_empty())),
    }
}

/// Apply `rules` in order and return the first accepted record array.
pub fn extract_records(doc: &Value, rules: &[ExtractionRule]) -> Vec<Value> {
    rules
        .iter()
        .find_map(|rule| resolve(doc, &rule.path).filter(|items| (rule.accept)(items)))
        .cloned()
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// One fetched page, flattened out of whatever envelope carried it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPage {
    pub records: Vec<Value>,
    /// Vehicle records shipped alongside a parts page.
    pub companion_vehicles: Vec<Value>,
    /// Explicit continuation flag, when the envelope carries one.
    pub more: Option<bool>,
    /// Explicit next pagination id, when the envelope carries one.
    pub next_id: Option<i64>,
    /// Total records reported by the upstream, when known.
    pub total: Option<u64>,
}

const META_CONTAINERS: &[&str] = &["result_set", "resultSet", "paginacion", "pagination"];

impl RawPage {
    /// Parse a response document for `entity`.
    pub fn from_document(doc: &Value, entity: EntityType) -> Self {
        let records = extract_records(doc, rules_for(entity));
        let companion_vehicles = match entity {
            EntityType::Vehicles => Vec::new(),
            _ => extract_records(doc, COMPANION_VEHICLE_RULES),
        };

        let meta: Vec<&Value> = META_CONTAINERS
            .iter()
            .filter_map(|k| lookup(doc, k))
            .chain(META_CONTAINERS.iter().filter_map(|k| lookup(doc, &format!("data.{k}"))))
            .collect();

        Self {
            records,
            companion_vehicles,
            more: meta_value(&meta, &["masRegistros", "hasMore", "more"]).and_then(as_bool),
            next_id: meta_value(&meta, &["lastId", "lastid", "nextId"]).and_then(as_i64),
            total: meta_value(&meta, &["total", "totalRegistros"])
                .and_then(as_i64)
                .and_then(|t| u64::try_from(t).ok()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

fn meta_value<'a>(containers: &[&'a Value], keys: &[&str]) -> Option<&'a Value> {
    containers.iter().find_map(|m| {
        keys.iter()
            .find_map(|k| m.get(*k))
            .filter(|v| !v.is_null())
    })
}

// ---------------------------------------------------------------------------
// Scalar helpers
// ---------------------------------------------------------------------------

/// Read an integer from a JSON number or numeric string.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a boolean from a JSON bool, number, or string.
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "si" | "sí" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Key variants holding a vehicle's pagination id.
pub const VEHICLE_ID_KEYS: &[&str] = &["idLocal", "IdLocal", "id", "Id"];

/// Key variants holding a part's pagination id.
pub const PART_ID_KEYS: &[&str] = &["refLocal", "RefLocal", "idLocal", "id"];

/// Key variants holding a record's modification date.
pub const MODIFIED_KEYS: &[&str] = &["fechaMod", "FechaMod", "fechaModificacion"];

/// Pagination id of a single record.
pub fn record_id(record: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| record.get(*k).and_then(as_i64))
}

/// Id keys for the given entity type.
pub fn id_keys(entity: EntityType) -> &'static [&'static str] {
    match entity {
        EntityType::Vehicles => VEHICLE_ID_KEYS,
        EntityType::Parts | EntityType::Catalog => PART_ID_KEYS,
    }
}

/// Latest modification date among `records`.
pub fn latest_modification(records: &[Value]) -> Option<Timestamp> {
    records
        .iter()
        .filter_map(|r| {
            MODIFIED_KEYS
                .iter()
                .find_map(|k| r.get(*k).and_then(Value::as_str))
                .and_then(parse_upstream_date)
        })
        .max()
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Compute the pagination id for the next request.
///
/// Prefers the envelope's explicit next id, then the last record's id,
/// then `current + page_size`. A candidate equal to `current` is treated
/// as absent so the cursor always moves.
pub fn next_cursor_id(page: &RawPage, entity: EntityType, current: i64, page_size: u32) -> i64 {
    let last_record = page
        .records
        .last()
        .and_then(|r| record_id(r, id_keys(entity)));

    [page.next_id, last_record]
        .into_iter()
        .flatten()
        .find(|id| *id != current)
        .unwrap_or(current + i64::from(page_size))
}

/// Decide whether another page should be requested.
///
/// An empty page always stops the loop. Otherwise any of the explicit
/// continuation flag, a reported total above `processed`, or a full page
/// keeps it going.
pub fn has_more(page: &RawPage, processed: u64, page_size: u32) -> bool {
    if page.is_empty() {
        return false;
    }
    let flagged = page.more == Some(true);
    let below_total = page.total.is_some_and(|t| t > processed);
    let full_page = page.len() >= page_size as usize;
    flagged || below_total || full_page
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
