//! Product catalog ingestion.
//!
//! Loads a JSON array of products from an external source into the
//! product store. Individual malformed records are logged and skipped;
//! the load continues for the remainder.

use serde_json::Value;

use crate::core::errors::ChatError;
use crate::models::Product;
use crate::store::ProductStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogLoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Parse a JSON array of product records and upsert each into the
/// store. A document that is not an array at all is fatal; a record
/// that fails to decode is skipped and counted.
pub async fn load_from_json(
    store: &ProductStore,
    json: &str,
) -> Result<CatalogLoadReport, ChatError> {
    let records: Vec<Value> = serde_json::from_str(json)
        .map_err(|e| ChatError::MalformedData(format!("product catalog: {}", e)))?;

    let mut report = CatalogLoadReport {
        loaded: 0,
        skipped: 0,
    };

    for record in records {
        match serde_json::from_value::<Product>(record) {
            Ok(product) => {
                store.upsert_product(&product).await?;
                report.loaded += 1;
            }
            Err(e) => {
                tracing::warn!("skipping malformed product record: {}", e);
                report.skipped += 1;
            }
        }
    }

    tracing::info!(
        "product catalog load complete: {} loaded, {} skipped",
        report.loaded,
        report.skipped
    );
    Ok(report)
}

/// Fetch the catalog document from `url` and load it.
pub async fn load_from_url(store: &ProductStore, url: &str) -> Result<CatalogLoadReport, ChatError> {
    let response = reqwest::get(url).await.map_err(ChatError::provider)?;
    if !response.status().is_success() {
        return Err(ChatError::Provider(format!(
            "catalog fetch failed ({}): {}",
            response.status(),
            url
        )));
    }

    let json = response.text().await.map_err(ChatError::provider)?;
    load_from_json(store, &json).await
}
