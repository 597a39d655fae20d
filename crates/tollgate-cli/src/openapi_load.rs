//! Startup loading of OpenAPI documents referenced by the config.
//!
//! Documents improve approval suggestions but never gate mediation, so a
//! source that fails to load only costs that host its template-driven
//! pattern candidates.

use anyhow::Context;
use tracing::{info, warn};

use tollgate::{OpenApiIndex, OpenApiSource, PolicyStore};

/// Build the index from every host config that names an OpenAPI source.
pub async fn build_index(policy: &PolicyStore) -> OpenApiIndex {
    let mut index = OpenApiIndex::new();
    for (host, config) in policy.snapshot().await {
        let Some(source) = &config.open_api_spec else {
            continue;
        };
        match load_document(source).await {
            Ok(doc) => match index.insert_document(&host, &doc) {
                Ok(count) => info!(host = %host, templates = count, "OpenAPI templates indexed"),
                Err(e) => warn!(host = %host, error = %e, "OpenAPI document unusable"),
            },
            Err(e) => warn!(host = %host, error = format!("{e:#}"), "OpenAPI source failed to load"),
        }
    }
    index
}

async fn load_document(source: &OpenApiSource) -> anyhow::Result<serde_json::Value> {
    let text = match source {
        OpenApiSource::Path(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {path}"))?,
        OpenApiSource::Url(url) => reqwest::get(url)
            .await
            .with_context(|| format!("fetching {url}"))?
            .error_for_status()
            .with_context(|| format!("fetching {url}"))?
            .text()
            .await
            .with_context(|| format!("reading body of {url}"))?,
    };
    Ok(OpenApiIndex::parse_document(&text)?)
}
