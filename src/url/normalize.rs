use crate::UrlError;
use std::path::Path;
use url::Url;

/// Converts user input into an absolute URL
///
/// Input that already carries a scheme (`https://`, `s3://`, `file://`, ...)
/// is parsed as-is. Anything else is treated as a local path, made absolute
/// against the current working directory and converted into a `file://` URL.
///
/// # Examples
///
/// ```
/// use stac_spider::url::to_url;
///
/// let url = to_url("https://example.com/catalog.json").unwrap();
/// assert_eq!(url.scheme(), "https");
///
/// let url = to_url("/data/stac/catalog.json").unwrap();
/// assert_eq!(url.as_str(), "file:///data/stac/catalog.json");
/// ```
pub fn to_url(input: &str) -> Result<Url, UrlError> {
    let input = input.trim();
    if has_scheme(input) {
        let url = Url::parse(input).map_err(|e| UrlError::Parse(format!("{}: {}", input, e)))?;
        return Ok(canonicalize(url));
    }

    let path = Path::new(input);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| UrlError::InvalidPath(format!("{}: {}", input, e)))?
            .join(path)
    };

    let url = Url::from_file_path(&absolute)
        .map_err(|_| UrlError::InvalidPath(absolute.display().to_string()))?;
    Ok(canonicalize(url))
}

/// Converts a local directory into a `file://` URL ending with a slash
///
/// Joining a file name onto the result places the file inside the directory.
pub fn to_directory_url(path: &Path) -> Result<Url, UrlError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| UrlError::InvalidPath(format!("{}: {}", path.display(), e)))?
            .join(path)
    };
    Url::from_directory_path(&absolute)
        .map_err(|_| UrlError::InvalidPath(absolute.display().to_string()))
}

/// Returns true when the input starts with a URL scheme
///
/// Single letter schemes are rejected so Windows drive letters (`C:\...`)
/// are still treated as paths.
fn has_scheme(input: &str) -> bool {
    match input.find("://") {
        Some(idx) if idx > 1 => input[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'),
        _ => false,
    }
}

/// Puts a URL into its canonical form for deduplication
///
/// Dot segments are already resolved by the URL parser, so two hrefs that
/// only differ by relative-path resolution end up identical. The fragment
/// never identifies a different document and is dropped.
pub fn canonicalize(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

/// Resolves a link href relative to the address of the document containing it
///
/// # Examples
///
/// ```
/// use stac_spider::url::{resolve_href, to_url};
///
/// let base = to_url("https://example.com/stac/catalog.json").unwrap();
/// let child = resolve_href(&base, "./a/../b/collection.json").unwrap();
/// assert_eq!(child.as_str(), "https://example.com/stac/b/collection.json");
/// ```
pub fn resolve_href(base: &Url, href: &str) -> Result<Url, UrlError> {
    if base.cannot_be_a_base() {
        return Err(UrlError::CannotBeABase(base.to_string()));
    }
    base.join(href)
        .map(canonicalize)
        .map_err(|e| UrlError::Parse(format!("{} relative to {}: {}", href, base, e)))
}

/// Replaces the final path segment of `url` with `file_name`
///
/// This is how an item finds the `collection.json` that lives next to it.
pub fn sibling(url: &Url, file_name: &str) -> Result<Url, UrlError> {
    resolve_href(url, file_name)
}

/// Returns the lowercase host of a URL, or an empty string for host-less URLs
pub fn extract_host(url: &Url) -> String {
    url.host_str().map(|h| h.to_lowercase()).unwrap_or_default()
}
