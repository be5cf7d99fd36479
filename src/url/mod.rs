//! Address handling for stac-spider
//!
//! Every document is identified by a canonical absolute URL. This module turns
//! user input (URLs or local paths) into URLs, resolves link hrefs against the
//! document that contains them, and derives the sibling addresses the crawler
//! needs (such as the collection that owns an item).

mod normalize;

pub use normalize::{canonicalize, extract_host, resolve_href, sibling, to_directory_url, to_url};
