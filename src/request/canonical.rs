use url::Url;

/// Canonicalizes a URL for fingerprinting
///
/// # Canonicalization Steps
///
/// 1. Scheme and host are lower-cased, default ports and dot segments are
///    dropped (done by the URL parser)
/// 2. Remove fragment (everything after #)
/// 3. Sort query parameters by key, then by value
/// 4. Remove empty query string (trailing ?)
///
/// Unlike link normalization, nothing that could change the fetched resource
/// is removed: trailing slashes, `www.` and every query parameter are kept.
///
/// # Examples
///
/// ```
/// use plucker::request::canonicalize_url;
/// use url::Url;
///
/// let url = Url::parse("HTTPS://Example.COM/a/../b?z=1&a=2#top").unwrap();
/// assert_eq!(canonicalize_url(&url), "https://example.com/b?a=2&z=1");
/// ```
pub fn canonicalize_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    if canonical.query().is_some() {
        let params = sorted_query_params(&canonical);

        if params.is_empty() {
            canonical.set_query(None);
        } else {
            canonical
                .query_pairs_mut()
                .clear()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }

    canonical.into()
}

/// Collects query parameters sorted by key, then value
fn sorted_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();

    params
}
