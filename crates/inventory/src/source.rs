//! The seam between the sync engine and the upstream catalog.

use async_trait::async_trait;
use partsync_core::catalog::{Cursor, EntityType};
use partsync_core::envelope::RawPage;

use crate::error::ClientError;

/// Anything that can serve paginated changesets of vehicles and parts.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch one page of `entity` records starting after `cursor`.
    async fn fetch_batch(
        &self,
        entity: EntityType,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<RawPage, ClientError>;
}
