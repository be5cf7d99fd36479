//! Random sampling crawl across many public catalogs
//!
//! Instead of walking every link, each catalog and collection follows a
//! shuffled subset of its links. The more documents a host has already
//! contributed, the more likely the walk of that host stops early, so large
//! hosts do not dominate the sample.

use crate::crawler::{CrawlEvent, EventKind, Flow, StacSpider};
use crate::stac::Link;
use crate::storage::StorageRegistry;
use crate::url::{extract_host, resolve_href};
use crate::{Result, SpiderError};
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

/// Default catalog listing used for seeds
pub const DEFAULT_INDEX: &str = "https://stacindex.org/api/catalogs";

/// Scale of the per-host stop probability
const MAX_RANDOM: f64 = 100.0;

/// One catalog of a STAC index listing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub url: String,

    #[serde(default)]
    pub slug: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub is_api: bool,

    #[serde(default)]
    pub is_private: bool,
}

/// Reads a STAC index listing and returns its static public catalogs, shuffled
pub async fn load_index(storage: &StorageRegistry, index: &Url) -> Result<Vec<IndexEntry>> {
    let bytes = storage.read(index).await?;
    let entries: Vec<IndexEntry> = serde_json::from_slice(&bytes)?;
    let total = entries.len();

    let mut catalogs: Vec<IndexEntry> = entries
        .into_iter()
        .filter(|entry| !entry.is_api && !entry.is_private)
        .collect();
    catalogs.shuffle(&mut rand::thread_rng());

    tracing::info!(
        "Loaded {} static public catalogs of {} from {}",
        catalogs.len(),
        total,
        index
    );
    Ok(catalogs)
}

/// Per-host link sampler
#[derive(Debug, Default)]
pub struct Sampler {
    host_counts: Mutex<HashMap<String, usize>>,
}

impl Sampler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribes the sampler to catalog, collection and empty events
    pub fn attach(self: &Arc<Self>, spider: &StacSpider) {
        for (kind, rel) in [(EventKind::Catalog, "child"), (EventKind::Collection, "item")] {
            let sampler = Arc::clone(self);
            spider.on(kind, move |spider, event| {
                let sampler = Arc::clone(&sampler);
                async move { sampler.follow(&spider, &event, rel).await }
            });
        }

        let sampler = Arc::clone(self);
        spider.on(EventKind::Empty, move |_, _| {
            let counts = sampler.host_counts();
            async move {
                let mut counts: Vec<_> = counts.into_iter().collect();
                counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                for (host, count) in counts {
                    tracing::info!("Host {}: {} links followed", host, count);
                }
                tracing::info!("Sample done");
                Ok(Flow::Continue)
            }
        });
    }

    /// Submits a random subset of the document's `rel` links
    ///
    /// Always vetoes the spider's own expansion, including for fetch errors.
    async fn follow(&self, spider: &StacSpider, event: &CrawlEvent, rel: &str) -> Result<Flow> {
        let (Some(document), Some(url)) = (event.document(), event.url()) else {
            return Ok(Flow::StopRecursion);
        };
        if document.is_error() {
            tracing::debug!("Not sampling unreadable {}", url);
            return Ok(Flow::StopRecursion);
        }

        let mut links: Vec<&Link> = document.links_with_rel(rel).collect();
        links.shuffle(&mut rand::thread_rng());

        let host = extract_host(url);
        for link in links {
            if !self.take_slot(&host) {
                tracing::debug!("Sample limit reached for {} at {}", host, url);
                break;
            }
            match resolve_href(url, &link.href) {
                Ok(child) => {
                    spider.process_url(child).await?;
                }
                Err(e) => tracing::warn!("Skipping link of {}: {}", url, e),
            }
        }
        Ok(Flow::StopRecursion)
    }

    /// Rolls for another link from `host`, counting it when the roll succeeds
    fn take_slot(&self, host: &str) -> bool {
        let mut counts = self.host_counts.lock().unwrap();
        let count = counts.entry(host.to_string()).or_insert(0);
        if rand::random::<f64>() * (*count as f64) > MAX_RANDOM {
            return false;
        }
        *count += 1;
        true
    }

    /// Number of links followed per host so far
    pub fn host_counts(&self) -> HashMap<String, usize> {
        self.host_counts.lock().unwrap().clone()
    }
}

/// Submits every catalog of the index, logging seeds that could not be read
pub async fn seed_from_index(spider: &StacSpider, catalogs: Vec<IndexEntry>) -> Result<()> {
    for entry in catalogs {
        let handle = match spider.process_seed(&entry.url).await {
            Ok(Some(handle)) => handle,
            Ok(None) => continue,
            Err(SpiderError::Url(e)) => {
                tracing::warn!("Skipping catalog {}: {}", entry.slug, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        tokio::spawn(async move {
            if let Ok(document) = handle.await {
                if document.is_error() {
                    tracing::error!("Failed to read catalog {} ({})", entry.slug, entry.url);
                }
            }
        });
    }
    Ok(())
}
