//! HTTP client for the upstream inventory API.
//!
//! Every request is a `GET` against a channel endpoint with the query
//! parameters carried in headers: `apikey`, `fecha` (modification-date
//! watermark), `lastid` (pagination id), `offset` (page size), `canal` and
//! `idempresa`.

use std::sync::Arc;

use async_trait::async_trait;
use partsync_core::catalog::{format_upstream_date, Cursor, EntityType};
use partsync_core::config::SyncConfig;
use partsync_core::envelope::RawPage;
use partsync_core::retry::RetryPolicy;

use crate::error::ClientError;
use crate::retry::with_retry;
use crate::source::CatalogSource;

/// Endpoint serving vehicle changesets.
pub const VEHICLES_ENDPOINT: &str = "RecuperarCambiosVehiculosCanal";

/// Endpoint serving part changesets.
pub const PARTS_ENDPOINT: &str = "RecuperarCambiosCanal";

/// Endpoint path for an entity type.
pub fn endpoint_for(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Vehicles => VEHICLES_ENDPOINT,
        EntityType::Parts | EntityType::Catalog => PARTS_ENDPOINT,
    }
}

/// Build the request headers for one page.
///
/// Fails with [`ClientError::Configuration`] when no usable API key is
/// configured.
pub fn request_headers(
    config: &SyncConfig,
    cursor: &Cursor,
    page_size: u32,
) -> Result<Vec<(&'static str, String)>, ClientError> {
    let api_key = config.api_key().ok_or_else(|| {
        ClientError::Configuration("INVENTORY_API_KEY is missing or a placeholder".into())
    })?;

    Ok(vec![
        ("apikey", api_key.to_string()),
        ("fecha", format_upstream_date(&cursor.since)),
        ("lastid", cursor.last_id.to_string()),
        ("offset", page_size.to_string()),
        ("canal", config.channel.clone()),
        ("idempresa", config.company_id.to_string()),
    ])
}

/// HTTP client for the inventory API.
pub struct InventoryClient {
    http: reqwest::Client,
    config: Arc<SyncConfig>,
    policy: RetryPolicy,
}

impl InventoryClient {
    /// Create a client using the configured timeout and retry policy.
    pub fn new(config: Arc<SyncConfig>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(http, config))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(http: reqwest::Client, config: Arc<SyncConfig>) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            http,
            config,
            policy,
        }
    }

    /// Whether a usable API key is configured.
    pub fn is_configured(&self) -> bool {
        self.config.api_key().is_some()
    }

    async fn fetch_once(
        &self,
        entity: EntityType,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<RawPage, ClientError> {
        let headers = request_headers(&self.config, cursor, page_size)?;
        let url = format!("{}/{}", self.config.api_base_url, endpoint_for(entity));

        let mut request = self.http.get(&url);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(ClientError::from_transport)?;
        let response = Self::ensure_success(response).await?;
        // A stalled or reset body is a transport failure, only bad JSON is Decode.
        let body = response.bytes().await.map_err(ClientError::from_transport)?;
        let document: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))?;

        Ok(RawPage::from_document(&document, entity))
    }

    /// Map non-2xx responses to a [`ClientError`], keeping the body.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::from_status(status.as_u16(), body))
    }
}

#[async_trait]
impl CatalogSource for InventoryClient {
    async fn fetch_batch(
        &self,
        entity: EntityType,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<RawPage, ClientError> {
        let page = with_retry(&self.policy, endpoint_for(entity), || {
            self.fetch_once(entity, cursor, page_size)
        })
        .await?;

        tracing::debug!(
            entity_type = %entity,
            last_id = cursor.last_id,
            records = page.len(),
            more = ?page.more,
            "Fetched inventory page",
        );
        Ok(page)
    }
}
