use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// Reserved id of the document substituted for anything that failed to load
pub const FETCH_ERROR_ID: &str = "$$FetchError";

/// Prefix of the members the cache adds to every stored document
pub const ANNOTATION_PREFIX: &str = "stac_spider:";

/// A link from one STAC document to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Relation label (`child`, `item`, `parent`, `self`, ...)
    pub rel: String,

    /// Target of the link, possibly relative to the containing document
    pub href: String,

    /// Any other link members (type, title, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A catalog, collection or item as read from storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacDocument {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub stac_type: Option<String>,

    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub links: Vec<Link>,

    /// Address the document was fetched from, added by the cache
    #[serde(
        rename = "stac_spider:source",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source: Option<String>,

    /// When the document was fetched, added by the cache
    #[serde(
        rename = "stac_spider:fetched_at",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fetched_at: Option<DateTime<Utc>>,

    /// Every other member of the document, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StacDocument {
    /// Records where and when this document was fetched
    pub fn annotate(&mut self, source: &Url, fetched_at: DateTime<Utc>) {
        self.source = Some(source.to_string());
        self.fetched_at = Some(fetched_at);
    }

    /// Item properties, when the document has any
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.extra.get("properties").and_then(Value::as_object)
    }

    /// A top level string member such as `license`
    pub fn string_member(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Stand-in for a document that could not be fetched or parsed
///
/// It is stored in the cache in the same JSON shape as a real document so a
/// failed address stays failed across runs until its cache entry is removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchError {
    id: String,

    /// The fetch or parse error message
    #[serde(rename = "error")]
    pub message: String,

    #[serde(rename = "stac_spider:source")]
    pub source: String,

    #[serde(rename = "stac_spider:fetched_at")]
    pub fetched_at: DateTime<Utc>,

    #[serde(default)]
    links: Vec<Link>,
}

impl FetchError {
    pub fn new(source: &Url, message: impl Into<String>) -> Self {
        Self {
            id: FETCH_ERROR_ID.to_string(),
            message: message.into(),
            source: source.to_string(),
            fetched_at: Utc::now(),
            links: Vec::new(),
        }
    }
}

/// A document handed to consumers
///
/// Consumers that need well formed data must check for the `Error` variant
/// (or `is_error`) before reading document specific members.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Stac(StacDocument),
    Error(FetchError),
}

impl Document {
    /// Parses a document from its JSON bytes
    ///
    /// Documents carrying the reserved [`FETCH_ERROR_ID`] are read back as
    /// the `Error` variant.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        if value.get("id").and_then(Value::as_str) == Some(FETCH_ERROR_ID) {
            return Ok(Self::Error(serde_json::from_value(value)?));
        }
        Ok(Self::Stac(serde_json::from_value(value)?))
    }

    /// Serializes the document back to JSON
    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Self::Stac(doc) => serde_json::to_vec(doc),
            Self::Error(err) => serde_json::to_vec(err),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Stac(doc) => &doc.id,
            Self::Error(err) => &err.id,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Stac(doc) => doc.title.as_deref(),
            Self::Error(_) => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Stac(doc) => doc.description.as_deref(),
            Self::Error(_) => None,
        }
    }

    /// All links of the document; a failed document has none
    pub fn links(&self) -> &[Link] {
        match self {
            Self::Stac(doc) => &doc.links,
            Self::Error(err) => &err.links,
        }
    }

    /// Links with the given relation, in document order
    pub fn links_with_rel<'a>(&'a self, rel: &'a str) -> impl Iterator<Item = &'a Link> + 'a {
        self.links().iter().filter(move |link| link.rel == rel)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn as_stac(&self) -> Option<&StacDocument> {
        match self {
            Self::Stac(doc) => Some(doc),
            Self::Error(_) => None,
        }
    }
}
