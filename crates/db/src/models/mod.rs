//! Row structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` struct matching the
//! database row, plus the input DTOs its repository accepts. Vehicle and
//! part writes take the normalized records from `partsync_core::catalog`
//! directly.

pub mod import_run;
pub mod import_schedule;
pub mod part;
pub mod sync_cursor;
pub mod vehicle;
pub mod vehicle_part;
