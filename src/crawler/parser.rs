//! HTML parser for extracting links and metadata
//!
//! This module handles parsing HTML content to extract:
//! - Page title and meta description
//! - Visible body text
//! - Outgoing links with their anchor text
//! - Signals the relevance scorer uses (structured data, publish date)

use crate::url::canonicalize_url;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Longest anchor text kept per link, in characters
const MAX_ANCHOR_CHARS: usize = 220;

/// Elements whose text is never visible content
const HIDDEN_ELEMENTS: &[&str] = &["head", "script", "style", "noscript", "template"];

/// An outgoing link and the text it was anchored on
#[derive(Debug, Clone, PartialEq)]
pub struct PageLink {
    /// Canonical absolute URL
    pub url: Url,
    pub text: String,
}

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// `<meta name="description">` (or `og:description`)
    pub description: Option<String>,

    /// Whitespace-normalized visible text
    pub text: String,

    /// Deduplicated outgoing links in document order
    pub links: Vec<PageLink>,

    /// Page embeds `application/ld+json`
    pub has_json_ld: bool,

    /// Page carries `itemtype` microdata
    pub has_microdata: bool,

    /// Publish date from article metadata or a `<time datetime>` element
    pub published: Option<String>,
}

/// Parses HTML content and extracts links and metadata
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs and fragment-only links
/// - Links back to the page itself
///
/// Links are resolved against `base_url`, canonicalized, deduplicated, and
/// capped at `max_links`.
///
/// # Returns
///
/// * `Ok(ParsedPage)` - Successfully parsed page
/// * `Err(String)` - The document has no content to parse
///
/// # Example
///
/// ```no_run
/// use stashy::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url, 16).unwrap();
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// ```
pub fn parse_html(html: &str, base_url: &Url, max_links: usize) -> Result<ParsedPage, String> {
    if html.trim().is_empty() {
        return Err(format!("Empty document at {}", base_url));
    }

    let document = Html::parse_document(html);

    Ok(ParsedPage {
        title: extract_title(&document),
        description: extract_description(&document),
        text: extract_text(&document),
        links: extract_links(&document, base_url, max_links),
        has_json_ld: has_match(&document, r#"script[type="application/ld+json"]"#),
        has_microdata: has_match(&document, "[itemtype]"),
        published: extract_published(&document),
    })
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

fn has_match(document: &Html, selector: &str) -> bool {
    select_first(document, selector).is_some()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    select_first(document, "title")
        .map(|element| normalize_whitespace(&element.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

fn extract_description(document: &Html) -> Option<String> {
    [
        r#"meta[name="description"]"#,
        r#"meta[property="og:description"]"#,
    ]
    .iter()
    .filter_map(|selector| select_first(document, selector))
    .filter_map(|element| element.value().attr("content"))
    .map(normalize_whitespace)
    .find(|s| !s.is_empty())
}

fn extract_published(document: &Html) -> Option<String> {
    select_first(document, r#"meta[property="article:published_time"]"#)
        .and_then(|element| element.value().attr("content"))
        .or_else(|| {
            select_first(document, "time[datetime]")
                .and_then(|element| element.value().attr("datetime"))
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Concatenates text nodes outside head/script/style
fn extract_text(document: &Html) -> String {
    let mut words: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| HIDDEN_ELEMENTS.contains(&element.name()))
        });

        if !hidden {
            words.extend(text.split_whitespace());
        }
    }

    words.join(" ")
}

/// Extracts valid, deduplicated links from the HTML document
fn extract_links(document: &Html, base_url: &Url, max_links: usize) -> Vec<PageLink> {
    let mut links = Vec::new();
    let mut seen = HashSet::new();

    let Ok(a_selector) = Selector::parse("a[href]") else {
        return links;
    };

    // The page itself never counts as an outgoing link
    if let Ok(own) = canonicalize_url(base_url.as_str()) {
        seen.insert(own.to_string());
    }

    for element in document.select(&a_selector) {
        if links.len() >= max_links {
            break;
        }

        // Skip if it has the download attribute
        if element.value().attr("download").is_some() {
            continue;
        }

        let Some(url) = element
            .value()
            .attr("href")
            .and_then(|href| resolve_link(href, base_url))
        else {
            continue;
        };

        if !seen.insert(url.to_string()) {
            continue;
        }

        let text: String = normalize_whitespace(&element.text().collect::<String>())
            .chars()
            .take(MAX_ANCHOR_CHARS)
            .collect();

        links.push(PageLink { url, text });
    }

    links
}

/// Resolves a link href to a canonical absolute URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    canonicalize_url(absolute_url.as_str()).ok()
}
