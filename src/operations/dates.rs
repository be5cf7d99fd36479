//! Groups items by their `created` and `updated` timestamps
//!
//! Every time the crawl drains, three documents are written to the output
//! directory:
//!
//! - `created.json`: timestamp -> addresses of the items created at that time
//! - `updated.json`: the same for `updated`, for items updated after creation
//! - `summary.json`: per timestamp, the item count and the distinct
//!   collection prefixes (the item address up to its last `/`)

use crate::crawler::{CrawlEvent, EventKind, Flow, StacSpider};
use crate::storage::StorageRegistry;
use crate::url::extract_host;
use crate::{Result, SpiderError};
use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use url::Url;

type Buckets = BTreeMap<String, Vec<String>>;

#[derive(Debug, Default)]
struct DateBuckets {
    created: Buckets,
    updated: Buckets,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct BucketSummary {
    pub items: usize,
    pub collections: BTreeSet<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct DateSummary {
    pub updated: BTreeMap<String, BucketSummary>,
    pub created: BTreeMap<String, BucketSummary>,
}

/// Collects item timestamps during a crawl and writes them out on every drain
pub struct DateIndex {
    output: Url,
    storage: Arc<StorageRegistry>,
    allowed_hosts: HashSet<String>,
    buckets: Mutex<DateBuckets>,
}

impl DateIndex {
    /// Creates an index writing into the `output` directory URL
    ///
    /// When `allowed_hosts` is not empty, a collection served from any other
    /// host fails the crawl.
    pub fn new(
        output: Url,
        storage: Arc<StorageRegistry>,
        allowed_hosts: impl IntoIterator<Item = String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            output,
            storage,
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|host| host.to_lowercase())
                .collect(),
            buckets: Mutex::new(DateBuckets::default()),
        })
    }

    /// Subscribes the index to the spider's events
    pub fn attach(self: &Arc<Self>, spider: &StacSpider) {
        let index = Arc::clone(self);
        spider.on(EventKind::Collection, move |_, event| {
            let outcome = index.check_host(&event);
            async move { outcome.map(|_| Flow::Continue) }
        });

        let index = Arc::clone(self);
        spider.on(EventKind::Item, move |_, event| {
            index.record(&event);
            async { Ok(Flow::Continue) }
        });

        let index = Arc::clone(self);
        spider.on(EventKind::Empty, move |_, _| {
            let index = Arc::clone(&index);
            async move {
                index.write().await?;
                Ok(Flow::Continue)
            }
        });
    }

    fn check_host(&self, event: &CrawlEvent) -> Result<()> {
        let Some(url) = event.url() else {
            return Ok(());
        };
        let host = extract_host(url);
        if self.allowed_hosts.is_empty() || self.allowed_hosts.contains(&host) {
            return Ok(());
        }
        Err(SpiderError::handler(
            url.as_str(),
            format!("Unknown host: {}", host),
        ))
    }

    fn record(&self, event: &CrawlEvent) {
        let (Some(document), Some(url)) = (event.document(), event.url()) else {
            return;
        };
        let Some(properties) = document.as_stac().and_then(|stac| stac.properties()) else {
            tracing::debug!("No properties on {}, skipping", url);
            return;
        };

        let created = properties.get("created").and_then(|v| v.as_str());
        let updated = properties.get("updated").and_then(|v| v.as_str());

        let mut buckets = self.buckets.lock().unwrap();
        if let Some(created) = created {
            buckets
                .created
                .entry(created.to_string())
                .or_default()
                .push(url.to_string());
        }
        if let Some(updated) = updated {
            if Some(updated) != created {
                buckets
                    .updated
                    .entry(updated.to_string())
                    .or_default()
                    .push(url.to_string());
            }
        }
    }

    /// Summarises the collected timestamps
    pub fn summary(&self) -> DateSummary {
        let buckets = self.buckets.lock().unwrap();
        DateSummary {
            updated: summarize(&buckets.updated),
            created: summarize(&buckets.created),
        }
    }

    /// Writes `created.json`, `updated.json` and `summary.json`
    pub async fn write(&self) -> Result<()> {
        let (created, updated) = {
            let buckets = self.buckets.lock().unwrap();
            (
                serde_json::to_vec_pretty(&buckets.created)?,
                serde_json::to_vec_pretty(&buckets.updated)?,
            )
        };
        let summary = serde_json::to_vec_pretty(&self.summary())?;

        self.write_file("updated.json", updated).await?;
        self.write_file("created.json", created).await?;
        self.write_file("summary.json", summary).await?;
        tracing::info!("Wrote date summary to {}", self.output);
        Ok(())
    }

    async fn write_file(&self, name: &str, data: Vec<u8>) -> Result<()> {
        let url = self
            .output
            .join(name)
            .map_err(|e| SpiderError::handler(self.output.as_str(), e))?;
        self.storage.write(&url, Bytes::from(data)).await?;
        Ok(())
    }
}

fn summarize(buckets: &Buckets) -> BTreeMap<String, BucketSummary> {
    buckets
        .iter()
        .map(|(timestamp, urls)| {
            let collections = urls
                .iter()
                .map(|url| match url.rfind('/') {
                    Some(idx) => url[..idx].to_string(),
                    None => url.clone(),
                })
                .collect();
            (
                timestamp.clone(),
                BucketSummary {
                    items: urls.len(),
                    collections,
                },
            )
        })
        .collect()
}
