//! Pure domain logic for the catalog synchronization engine.
//!
//! Nothing in this crate performs I/O. Persistence lives in `partsync-db`,
//! the upstream client in `partsync-inventory`, and orchestration in
//! `partsync-sync`.

pub mod brands;
pub mod catalog;
pub mod config;
pub mod envelope;
pub mod error;
pub mod import_run;
pub mod normalize;
pub mod reconcile;
pub mod retry;
pub mod schedule;
pub mod search;
pub mod types;
