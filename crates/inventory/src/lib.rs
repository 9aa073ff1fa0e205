//! Client for the upstream inventory API.
//!
//! [`InventoryClient`] is the production [`CatalogSource`]; the sync engine
//! only depends on the trait.

pub mod client;
pub mod error;
pub mod retry;
pub mod source;

pub use client::InventoryClient;
pub use error::ClientError;
pub use partsync_core::envelope::RawPage;
pub use source::CatalogSource;
