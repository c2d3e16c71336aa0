use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use stashy::url::extract_host;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_host(&url), Some("example.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.to_lowercase())
        .filter(|h| !h.is_empty())
}

/// Scores how closely a candidate link's host relates to its parent page
///
/// * `1.0` - same host
/// * `0.78` - same last two labels (e.g. `maps.example.com` and `example.com`)
/// * `0.45` - unrelated hosts
/// * `0.0` - either URL has no host
pub fn host_affinity(parent: &Url, candidate: &Url) -> f64 {
    let (Some(parent_host), Some(candidate_host)) = (extract_host(parent), extract_host(candidate))
    else {
        return 0.0;
    };

    if parent_host == candidate_host {
        return 1.0;
    }

    if registrable_suffix(&parent_host) == registrable_suffix(&candidate_host) {
        return 0.78;
    }

    0.45
}

fn registrable_suffix(host: &str) -> Vec<&str> {
    let labels: Vec<&str> = host.split('.').collect();
    let start = labels.len().saturating_sub(2);
    labels[start..].to_vec()
}
