//! Crawl events and their handlers

use crate::crawler::StacSpider;
use crate::stac::Document;
use crate::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use url::Url;

/// What a handler wants the crawler to do with the links of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Follow the document's links as usual
    Continue,

    /// Do not follow any of the document's links
    StopRecursion,
}

/// Kind of event a handler subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Catalog,
    Collection,
    Item,

    /// The task queue drained; fires again every time it drains
    Empty,
}

/// An event delivered to handlers
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    Catalog { document: Arc<Document>, url: Url },
    Collection { document: Arc<Document>, url: Url },
    Item { document: Arc<Document>, url: Url },
    Empty,
}

impl CrawlEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Catalog { .. } => EventKind::Catalog,
            Self::Collection { .. } => EventKind::Collection,
            Self::Item { .. } => EventKind::Item,
            Self::Empty => EventKind::Empty,
        }
    }

    /// The fetched document, or `None` for `Empty`
    pub fn document(&self) -> Option<&Arc<Document>> {
        match self {
            Self::Catalog { document, .. }
            | Self::Collection { document, .. }
            | Self::Item { document, .. } => Some(document),
            Self::Empty => None,
        }
    }

    /// Address the document was read from, or `None` for `Empty`
    pub fn url(&self) -> Option<&Url> {
        match self {
            Self::Catalog { url, .. } | Self::Collection { url, .. } | Self::Item { url, .. } => {
                Some(url)
            }
            Self::Empty => None,
        }
    }
}

/// A registered event handler
///
/// Handlers receive a handle to the spider so they can submit more work or
/// look up collections without keeping the spider alive themselves.
pub(crate) type Handler =
    Arc<dyn Fn(StacSpider, CrawlEvent) -> BoxFuture<'static, Result<Flow>> + Send + Sync>;
