//! Catalog synchronization engine.
//!
//! - [`ImportService`]: control surface (start, status, pause, resume,
//!   cancel, history). Creates runs and hands them to the [`RunQueue`].
//! - [`ImportWorker`]: executes queued runs through [`ImportRunner`], which
//!   pages the upstream API, upserts, resolves parked relations and
//!   reconciles availability.
//! - [`ImportScheduler`]: starts scheduled imports.
//! - [`PartCounterRefresher`]: keeps per-vehicle part counters current.
//!
//! All persistence goes through [`CatalogStore`].

pub mod counters;
pub mod error;
pub mod ingest;
pub mod reconciler;
pub mod resolver;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tracker;
pub mod upsert;
pub mod worker;

#[cfg(test)]
mod testing;

pub use counters::PartCounterRefresher;
pub use error::{StoreError, SyncError};
pub use runner::ImportRunner;
pub use scheduler::ImportScheduler;
pub use service::ImportService;
pub use store::{CatalogStore, PgCatalogStore};
pub use worker::{ImportWorker, RunQueue};
