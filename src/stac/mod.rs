//! STAC document model
//!
//! Catalogs, collections and items share one JSON shape as far as the crawler
//! is concerned: an id, an optional title and description, and an ordered list
//! of links. Everything else in the document is preserved untouched so
//! consumers can read it.

mod document;
mod kind;

pub use document::{Document, FetchError, Link, StacDocument, ANNOTATION_PREFIX, FETCH_ERROR_ID};
pub use kind::{DocumentKind, CATALOG_FILE, COLLECTION_FILE};
