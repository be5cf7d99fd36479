use std::fmt;
use url::Url;

/// File name of a collection document
pub const COLLECTION_FILE: &str = "collection.json";

/// File name of a catalog document
pub const CATALOG_FILE: &str = "catalog.json";

/// Role of a document in the STAC tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// Non-leaf document whose `child` links point to catalogs or collections
    Catalog,

    /// Group of items, linked to them with `item` links
    Collection,

    /// Leaf metadata record
    Item,
}

impl DocumentKind {
    /// Classifies an address by the end of its path
    ///
    /// Anything that is not a catalog or collection document is treated as
    /// an item, including addresses without any recognisable suffix.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_spider::stac::DocumentKind;
    /// use url::Url;
    ///
    /// let url = Url::parse("https://example.com/nz/collection.json").unwrap();
    /// assert_eq!(DocumentKind::from_url(&url), DocumentKind::Collection);
    /// ```
    pub fn from_url(url: &Url) -> Self {
        let path = url.path();
        if path.ends_with(COLLECTION_FILE) {
            Self::Collection
        } else if path.ends_with(CATALOG_FILE) {
            Self::Catalog
        } else {
            Self::Item
        }
    }

    /// Relation label of the links this kind of document expands
    pub fn expands_rel(&self) -> Option<&'static str> {
        match self {
            Self::Catalog => Some("child"),
            Self::Collection => Some("item"),
            Self::Item => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Collection => "collection",
            Self::Item => "item",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
