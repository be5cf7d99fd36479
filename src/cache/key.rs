//! Cache key derivation
//!
//! Keys are flat file names. The scheme and host come first so two backends
//! sharing a path layout never collide, and every `/` in the path becomes
//! `__` so nested documents cannot escape into sub directories.

use url::Url;

/// Suffix shared by every byte range entry
const RANGE_SUFFIX: &str = ".bin";

fn prefix(url: &Url) -> String {
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}_{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    let path = url.path().trim_start_matches('/').replace('/', "__");
    format!("{}.{}.{}", url.scheme(), host, path)
}

/// File name of the cached whole document at `url`
///
/// # Examples
///
/// ```
/// use stac_spider::cache::document_key;
/// use url::Url;
///
/// let url = Url::parse("s3://nz-imagery/auckland/collection.json").unwrap();
/// assert_eq!(document_key(&url), "s3.nz-imagery.auckland__collection.json");
/// ```
pub fn document_key(url: &Url) -> String {
    prefix(url)
}

/// File name of the cached byte range `offset..offset + length` of `url`
pub fn range_key(url: &Url, offset: u64, length: u64) -> String {
    format!("{}_at_{}+{}{}", prefix(url), offset, length, RANGE_SUFFIX)
}
