//! Shared fixtures for the integration tests

use serde_json::json;
use stac_spider::config::{CrawlerConfig, UserAgentConfig};
use stac_spider::storage::{MemoryStorage, StorageRegistry};
use stac_spider::{Cache, StacSpider};
use std::path::Path;
use std::sync::Arc;

/// Serializes a minimal STAC document with the given links
pub fn stac_doc(id: &str, links: &[(&str, &str)]) -> String {
    let links: Vec<_> = links
        .iter()
        .map(|(rel, href)| json!({"rel": rel, "href": href}))
        .collect();
    json!({"stac_version": "1.0.0", "id": id, "title": id, "links": links}).to_string()
}

/// Serializes a STAC item with timestamps
pub fn stac_item(id: &str, created: &str, updated: &str) -> String {
    json!({
        "type": "Feature",
        "stac_version": "1.0.0",
        "id": id,
        "geometry": null,
        "properties": {"datetime": null, "created": created, "updated": updated},
        "links": [{"rel": "collection", "href": "./collection.json"}]
    })
    .to_string()
}

/// Registry with the default file and HTTP backends
pub fn default_registry() -> Arc<StorageRegistry> {
    Arc::new(
        StorageRegistry::with_defaults(&UserAgentConfig::default())
            .expect("Failed to build storage registry"),
    )
}

/// Registry serving `memory://` from the given storage
pub fn memory_registry(memory: &MemoryStorage) -> Arc<StorageRegistry> {
    let mut registry = StorageRegistry::new();
    registry.register("memory://", Arc::new(memory.clone()));
    Arc::new(registry)
}

pub fn spider(
    registry: Arc<StorageRegistry>,
    cache_dir: &Path,
    concurrency: usize,
    max_queue_size: usize,
) -> StacSpider {
    let cache = Arc::new(Cache::new(cache_dir, registry));
    StacSpider::new(
        CrawlerConfig {
            concurrency,
            max_queue_size,
        },
        cache,
    )
}
