//! Crawl engine - walks a STAC tree and emits an event per document
//!
//! Every address moves through the same steps exactly once: it is marked as
//! seen, classified by its file name, queued, fetched through the cache and
//! emitted to the registered handlers. Only then are its links expanded,
//! unless a handler vetoed the expansion.

use crate::cache::Cache;
use crate::config::CrawlerConfig;
use crate::crawler::events::{CrawlEvent, EventKind, Flow, Handler};
use crate::crawler::queue::{panic_message, TaskHandle, TaskQueue};
use crate::crawler::single_flight::SingleFlight;
use crate::stac::{Document, DocumentKind, COLLECTION_FILE};
use crate::url::{canonicalize, resolve_href, sibling, to_url};
use crate::{Result, SpiderError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use url::Url;

/// Memoised outcome of fetching and emitting a collection
type CollectionResult = std::result::Result<(Arc<Document>, Flow), Arc<SpiderError>>;

/// Snapshot of the crawl counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    /// Catalogs fully processed
    pub catalogs: usize,

    /// Distinct collections registered
    pub collections: usize,

    /// Items fully processed
    pub items: usize,

    /// Distinct addresses submitted
    pub seen: usize,
}

struct Inner {
    config: CrawlerConfig,
    cache: Arc<Cache>,
    queue: TaskQueue,
    seen: Mutex<HashSet<String>>,
    collections: SingleFlight<String, CollectionResult>,
    handlers: RwLock<Vec<(EventKind, Handler)>>,
    catalog_count: AtomicUsize,
    collection_count: AtomicUsize,
    item_count: AtomicUsize,
    failure: Mutex<Option<Arc<SpiderError>>>,
}

/// Concurrent STAC crawler
///
/// Cloning is cheap; all clones drive the same crawl.
#[derive(Clone)]
pub struct StacSpider {
    inner: Arc<Inner>,
}

impl StacSpider {
    /// Creates a spider
    ///
    /// # Arguments
    ///
    /// * `config` - Parallelism and backpressure ceiling
    /// * `cache` - Cache every document is read through
    pub fn new(config: CrawlerConfig, cache: Arc<Cache>) -> Self {
        let queue = TaskQueue::new(config.concurrency);
        let inner = Arc::new(Inner {
            config,
            cache,
            queue,
            seen: Mutex::new(HashSet::new()),
            collections: SingleFlight::new(),
            handlers: RwLock::new(Vec::new()),
            catalog_count: AtomicUsize::new(0),
            collection_count: AtomicUsize::new(0),
            item_count: AtomicUsize::new(0),
            failure: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        inner.queue.on_empty(move || {
            let spider = weak.upgrade().map(|inner| StacSpider { inner });
            async move {
                if let Some(spider) = spider {
                    tracing::debug!("Queue drained, {} addresses seen", spider.seen_count());
                    if let Err(e) = spider.emit(CrawlEvent::Empty).await {
                        spider.fail("empty", e);
                    }
                }
            }
        });

        Self { inner }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.inner.cache
    }

    /// Subscribes `handler` to events of `kind`
    ///
    /// Handlers of one kind run one after another in registration order. A
    /// handler error is fatal for the whole crawl.
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(StacSpider, CrawlEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Flow>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |spider: StacSpider, event: CrawlEvent| handler(spider, event).boxed());
        self.inner.handlers.write().unwrap().push((kind, handler));
    }

    /// Delivers `event` to every handler subscribed to its kind
    ///
    /// Returns `Flow::StopRecursion` if any handler asked for it. All handlers
    /// run regardless; the first error stops the emission.
    pub async fn emit(&self, event: CrawlEvent) -> Result<Flow> {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let mut flow = Flow::Continue;
        for handler in handlers {
            if handler(self.clone(), event.clone()).await? == Flow::StopRecursion {
                flow = Flow::StopRecursion;
            }
        }
        Ok(flow)
    }

    /// Parses `input` as a URL or local path and submits it
    pub async fn process_seed(&self, input: &str) -> Result<Option<TaskHandle<Arc<Document>>>> {
        let url = to_url(input)?;
        self.process_url(url).await
    }

    /// Submits an address for processing
    ///
    /// Waits for room in the queue first when the backpressure ceiling is
    /// reached.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(handle))` - The address was queued; the handle resolves to its document
    /// * `Ok(None)` - The address was already submitted earlier in this crawl
    /// * `Err(SpiderError::Aborted)` - The crawl already failed
    pub async fn process_url(&self, url: Url) -> Result<Option<TaskHandle<Arc<Document>>>> {
        if self.has_failed() {
            return Err(SpiderError::Aborted);
        }

        let url = canonicalize(url);
        let inserted = self.inner.seen.lock().unwrap().insert(url.to_string());
        if !inserted {
            tracing::trace!("Already seen: {}", url);
            return Ok(None);
        }

        self.inner
            .queue
            .wait_for_capacity(self.inner.config.max_queue_size)
            .await;

        let kind = DocumentKind::from_url(&url);
        Ok(Some(self.inner.queue.push(self.clone().run(kind, url))))
    }

    /// Runs the handler for one queued address and records any failure
    fn run(self, kind: DocumentKind, url: Url) -> BoxFuture<'static, Result<Arc<Document>>> {
        async move {
            let outcome = AssertUnwindSafe(self.dispatch(kind, &url))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(SpiderError::TaskPanicked(panic_message(&*panic))));
            outcome.map_err(|e| self.fail(url.as_str(), e))
        }
        .boxed()
    }

    async fn dispatch(&self, kind: DocumentKind, url: &Url) -> Result<Arc<Document>> {
        match kind {
            DocumentKind::Catalog => self.process_catalog(url).await,
            DocumentKind::Collection => self.process_collection(url, true).await,
            DocumentKind::Item => self.process_item(url).await,
        }
    }

    /// Fetches a catalog, emits it and submits its `child` links
    pub async fn process_catalog(&self, url: &Url) -> Result<Arc<Document>> {
        tracing::debug!("Fetching catalog: {}", url);
        let document = self.read(url).await;

        let flow = self
            .emit(CrawlEvent::Catalog {
                document: Arc::clone(&document),
                url: url.clone(),
            })
            .await?;
        self.expand(&document, url, DocumentKind::Catalog, flow).await?;

        self.inner.catalog_count.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            "Catalog done: {} ({}), queue: {}",
            url,
            document.title().unwrap_or(document.id()),
            self.inner.queue.len()
        );
        Ok(document)
    }

    /// Fetches a collection, emits it and, if `recursive`, submits its `item` links
    ///
    /// The fetch and the emission happen once per address, shared with
    /// [`get_collection`](Self::get_collection); a later call only decides
    /// whether to expand, following the flow the handlers returned.
    pub async fn process_collection(&self, url: &Url, recursive: bool) -> Result<Arc<Document>> {
        let (document, flow) = self.collection(url).await?;
        if recursive {
            self.expand(&document, url, DocumentKind::Collection, flow).await?;
        }
        Ok(document)
    }

    /// Returns the collection that sits next to `item_url`
    ///
    /// The collection is fetched and emitted at most once per crawl; every
    /// concurrent caller waits on the same fetch. A missing collection comes
    /// back as a fetch error document, not as an error.
    pub async fn get_collection(&self, item_url: &Url) -> Result<Arc<Document>> {
        let url = sibling(item_url, COLLECTION_FILE)?;
        let (document, _) = self.collection(&url).await?;
        Ok(document)
    }

    /// Single-flight fetch and emission of the collection at `url`
    ///
    /// The work runs as its own queued task. A caller waiting for it from
    /// inside the queue gives up its permit meanwhile, so the collection's
    /// handlers can submit work even when every permit is held by waiters.
    async fn collection(&self, url: &Url) -> Result<(Arc<Document>, Flow)> {
        let spider = self.clone();
        let key = url.to_string();
        let url = url.clone();
        let fetch = self.inner.collections.get_or_start(key, move || {
            spider.inner.collection_count.fetch_add(1, Ordering::SeqCst);
            let handle = spider.inner.queue.push(spider.clone().fetch_collection(url));
            async move {
                handle.await.map_err(|e| match e {
                    SpiderError::Shared(e) => e,
                    e => Arc::new(e),
                })
            }
        });

        let ready = fetch.peek().cloned();
        let outcome = match ready {
            Some(outcome) => outcome,
            None => self.inner.queue.park_on(fetch).await,
        };
        outcome.map_err(SpiderError::Shared)
    }

    fn fetch_collection(self, url: Url) -> BoxFuture<'static, Result<(Arc<Document>, Flow)>> {
        async move {
            tracing::debug!("Fetching collection: {}", url);
            let document = self.read(&url).await;

            let flow = self
                .emit(CrawlEvent::Collection {
                    document: Arc::clone(&document),
                    url: url.clone(),
                })
                .await?;

            tracing::info!(
                "Collection done: {} ({}), queue: {}",
                url,
                document.title().unwrap_or(document.id()),
                self.inner.queue.len()
            );
            Ok((document, flow))
        }
        .boxed()
    }

    /// Resolves the item's collection, then fetches and emits the item
    pub async fn process_item(&self, url: &Url) -> Result<Arc<Document>> {
        tracing::trace!("Fetching item: {}", url);
        self.get_collection(url).await?;

        let document = self.read(url).await;
        self.emit(CrawlEvent::Item {
            document: Arc::clone(&document),
            url: url.clone(),
        })
        .await?;

        self.inner.item_count.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("Item done: {} ({})", url, document.id());
        Ok(document)
    }

    /// Waits for every queued task and returns the first fatal error, if any
    pub async fn join(&self) -> Result<()> {
        self.inner.queue.join().await;
        let failure = self.inner.failure.lock().unwrap().clone();
        match failure {
            Some(e) => Err(SpiderError::Shared(e)),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> CrawlStats {
        CrawlStats {
            catalogs: self.inner.catalog_count.load(Ordering::SeqCst),
            collections: self.inner.collection_count.load(Ordering::SeqCst),
            items: self.inner.item_count.load(Ordering::SeqCst),
            seen: self.seen_count(),
        }
    }

    pub fn seen_count(&self) -> usize {
        self.inner.seen.lock().unwrap().len()
    }

    /// Number of queued tasks that have not completed
    pub fn outstanding(&self) -> usize {
        self.inner.queue.len()
    }

    async fn read(&self, url: &Url) -> Arc<Document> {
        Arc::new(self.inner.cache.read_document(url).await)
    }

    /// Submits the links of `document` that its kind expands
    async fn expand(
        &self,
        document: &Document,
        base: &Url,
        kind: DocumentKind,
        flow: Flow,
    ) -> Result<()> {
        let Some(rel) = kind.expands_rel() else {
            return Ok(());
        };
        if flow == Flow::StopRecursion {
            tracing::debug!("Not following {} links of {}: stopped by a handler", rel, base);
            return Ok(());
        }

        for link in document.links_with_rel(rel) {
            match resolve_href(base, &link.href) {
                Ok(child) => {
                    self.process_url(child).await?;
                }
                Err(e) => tracing::warn!("Skipping link of {}: {}", base, e),
            }
        }
        Ok(())
    }

    fn has_failed(&self) -> bool {
        self.inner.failure.lock().unwrap().is_some()
    }

    /// Records a fatal error, keeping only the first one
    fn fail(&self, context: &str, error: SpiderError) -> SpiderError {
        let error = match error {
            SpiderError::Shared(e) => e,
            e => Arc::new(e),
        };

        if matches!(*error, SpiderError::Aborted) {
            tracing::debug!("Stopped {}: crawl aborted", context);
        } else {
            tracing::error!("Failed to process {}: {}", context, error);
        }

        let mut failure = self.inner.failure.lock().unwrap();
        if failure.is_none() {
            *failure = Some(Arc::clone(&error));
        }
        SpiderError::Shared(error)
    }
}

impl std::fmt::Debug for StacSpider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StacSpider")
            .field("config", &self.inner.config)
            .field("queue", &self.inner.queue)
            .field("stats", &self.stats())
            .finish()
    }
}
