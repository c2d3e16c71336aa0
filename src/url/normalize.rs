use crate::UrlError;
use url::Url;

/// Canonicalizes a URL into the form used as the frontier's dedup key
///
/// # Canonicalization Steps
///
/// 1. Trim surrounding whitespace and parse; reject if malformed
/// 2. Accept only `http` and `https`
/// 3. Lowercase the host
/// 4. Resolve dot segments; an empty path becomes `/`
/// 5. Remove the fragment
/// 6. Keep the query string as given (query parameters can select content)
///
/// # Arguments
///
/// * `raw` - The URL string to canonicalize
///
/// # Returns
///
/// * `Ok(Url)` - Canonical URL
/// * `Err(UrlError)` - Failed to parse the URL or unsupported scheme
///
/// # Examples
///
/// ```
/// use stashy::url::canonicalize_url;
///
/// let url = canonicalize_url("https://Example.com/maps/path#frag").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/maps/path");
/// ```
pub fn canonicalize_url(raw: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    // The url crate already lowercases ASCII hosts for special schemes, but
    // IDNA and odd inputs make it worth being explicit.
    let host = url.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();
    if host.is_empty() {
        return Err(UrlError::MissingHost);
    }
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Parse(format!("Failed to set host: {}", e)))?;

    if url.path().is_empty() {
        url.set_path("/");
    }

    url.set_fragment(None);

    // A bare trailing `?` carries nothing
    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_host_and_drops_fragment() {
        let result = canonicalize_url("https://Example.com/maps/path#frag").unwrap();
        assert_eq!(result.as_str(), "https://example.com/maps/path");
    }

    #[test]
    fn test_path_case_preserved() {
        let result = canonicalize_url("https://EXAMPLE.COM/Page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Page");
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let result = canonicalize_url("https://example.com").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_query_is_kept() {
        let result = canonicalize_url("https://example.com/search?q=lidar&page=2").unwrap();
        assert_eq!(result.as_str(), "https://example.com/search?q=lidar&page=2");
    }

    #[test]
    fn test_empty_query_removed() {
        let result = canonicalize_url("https://example.com/page?").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_dot_segments_resolved() {
        let result = canonicalize_url("https://example.com/a/../b/./c").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c");
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        let result = canonicalize_url("  http://example.com/x \n").unwrap();
        assert_eq!(result.as_str(), "http://example.com/x");
    }

    #[test]
    fn test_http_is_not_upgraded() {
        let result = canonicalize_url("http://example.com/page").unwrap();
        assert_eq!(result.scheme(), "http");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = canonicalize_url("ftp://example.com/page");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(
            canonicalize_url("not a url").unwrap_err(),
            UrlError::Parse(_)
        ));
    }

    #[test]
    fn test_same_identity_for_variants() {
        let a = canonicalize_url("https://EXAMPLE.com/x#one").unwrap();
        let b = canonicalize_url("https://example.com/x#two").unwrap();
        assert_eq!(a, b);
    }
}
