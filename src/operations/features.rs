//! Streams every crawled item into a GeoJSON FeatureCollection
//!
//! Items are written as they arrive, so memory use does not grow with the
//! size of the crawl. The collection's title, description and license are
//! copied into each item's properties.

use crate::crawler::{EventKind, Flow, StacSpider};
use crate::stac::{Document, ANNOTATION_PREFIX};
use crate::Result;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use url::Url;

const HEADER: &[u8] = b"{\"type\":\"FeatureCollection\",\"features\":[\n";
const SEPARATOR: &[u8] = b",\n  ";
const FOOTER: &[u8] = b"\n]}\n";

struct WriterState {
    file: Option<BufWriter<File>>,
    features: usize,
}

/// Incremental writer of a FeatureCollection file
pub struct FeatureWriter {
    path: PathBuf,
    state: Mutex<WriterState>,
}

impl FeatureWriter {
    /// Creates (or truncates) the output file and writes the collection header
    pub async fn create(path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = BufWriter::new(File::create(&path).await?);
        file.write_all(HEADER).await?;

        Ok(Arc::new(Self {
            path,
            state: Mutex::new(WriterState {
                file: Some(file),
                features: 0,
            }),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribes the writer to the spider's item and empty events
    pub fn attach(self: &Arc<Self>, spider: &StacSpider) {
        let writer = Arc::clone(self);
        spider.on(EventKind::Item, move |spider, event| {
            let writer = Arc::clone(&writer);
            async move {
                if let (Some(document), Some(url)) = (event.document(), event.url()) {
                    writer.write_item(&spider, document, url).await?;
                }
                Ok(Flow::Continue)
            }
        });

        let writer = Arc::clone(self);
        spider.on(EventKind::Empty, move |_, _| {
            let writer = Arc::clone(&writer);
            async move {
                writer.flush().await?;
                Ok(Flow::Continue)
            }
        });
    }

    async fn write_item(&self, spider: &StacSpider, document: &Document, url: &Url) -> Result<()> {
        let Some(item) = document.as_stac() else {
            tracing::debug!("Skipping unreadable item {}", url);
            return Ok(());
        };
        let collection = spider.get_collection(url).await?;
        let feature = to_feature(serde_json::to_value(item)?, &collection);
        self.append(&feature).await
    }

    /// Appends one feature to the collection
    pub async fn append(&self, feature: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(feature)?;
        let mut state = self.state.lock().await;
        let features = state.features;
        let Some(file) = state.file.as_mut() else {
            tracing::warn!("Feature written after {} was closed", self.path.display());
            return Ok(());
        };
        if features > 0 {
            file.write_all(SEPARATOR).await?;
        }
        file.write_all(&bytes).await?;
        state.features += 1;
        Ok(())
    }

    /// Flushes buffered features to disk
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(file) = state.file.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }

    /// Writes the footer and closes the file, returning the number of features
    pub async fn finish(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        if let Some(mut file) = state.file.take() {
            file.write_all(FOOTER).await?;
            file.flush().await?;
            tracing::info!(
                "Wrote {} features to {}",
                state.features,
                self.path.display()
            );
        }
        Ok(state.features)
    }
}

/// Copies collection metadata into an item and drops a null `datetime`
///
/// The cache's own members are removed; the feature carries only what the
/// item was published with.
fn to_feature(mut item: Value, collection: &Document) -> Value {
    let Some(object) = item.as_object_mut() else {
        return item;
    };
    object.retain(|key, _| !key.starts_with(ANNOTATION_PREFIX));
    let properties = object
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(properties) = properties.as_object_mut() else {
        return item;
    };

    if properties.get("datetime").is_some_and(Value::is_null) {
        properties.remove("datetime");
    }

    let stac = collection.as_stac();
    let copied = [
        ("title", collection.title()),
        ("description", collection.description()),
        ("license", stac.and_then(|c| c.string_member("license"))),
    ];
    for (key, value) in copied {
        if let Some(value) = value {
            properties.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    item
}
