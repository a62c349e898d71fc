//! HTML parser for extracting links
//!
//! Link-following mode derives child work units from every `<a href>` on a
//! page; partition mode lists product anchors matching a configured selector.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// An anchor picked out of a page by a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// Absolute URL
    pub url: String,
    /// Trimmed text content, used as a breadcrumb label
    pub text: String,
}

/// Extracts all followable links from an HTML page
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links and data URIs
/// - Fragment-only links
///
/// Links are returned absolute, in document order, without duplicates.
///
/// # Example
///
/// ```
/// use pricecrawl::crawler::extract_links;
/// use url::Url;
///
/// let html = r#"<a href="/slevy/maso">Maso</a><a href="/slevy/maso">again</a>"#;
/// let base = Url::parse("https://www.kupi.cz/slevy").unwrap();
/// assert_eq!(extract_links(html, &base), vec!["https://www.kupi.cz/slevy/maso"]);
/// ```
pub fn extract_links(html: &str, base_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut push = |href: &str| {
        if let Some(absolute) = resolve_link(href, base_url) {
            if seen.insert(absolute.clone()) {
                links.push(absolute);
            }
        }
    };

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    links
}

/// Lists anchors matching `selector`, resolved against `base_url`
///
/// Elements without a usable `href` are skipped. An invalid selector yields
/// no anchors; selectors are validated when the configuration is loaded.
pub fn select_anchors(html: &str, selector: &str, base_url: &Url) -> Vec<Anchor> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();

    document
        .select(&selector)
        .filter_map(|element| {
            let url = resolve_link(element.value().attr("href")?, base_url)?;
            let text = element
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            Some(Anchor { url, text })
        })
        .filter(|anchor| seen.insert(anchor.url.clone()))
        .collect()
}

/// Schemes that never lead to a crawlable page
const SKIPPED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:"];

/// Resolves an href against the page URL
///
/// Returns `None` for empty and fragment-only hrefs, skipped schemes, and
/// anything that does not resolve to an http(s) URL.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if SKIPPED_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme)) {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    matches!(absolute.scheme(), "http" | "https").then(|| absolute.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Url {
        Url::parse("https://www.kupi.cz/slevy/maso").unwrap()
    }

    #[test]
    fn test_links_are_made_absolute() {
        let html = r#"
            <a href="https://www.kupi.cz/letaky">Letáky</a>
            <a href="/slevy/syry">Sýry</a>
            <a href="hovezi">Hovězí</a>
        "#;
        assert_eq!(
            extract_links(html, &listing()),
            vec![
                "https://www.kupi.cz/letaky",
                "https://www.kupi.cz/slevy/syry",
                "https://www.kupi.cz/slevy/hovezi",
            ]
        );
    }

    #[test]
    fn test_unfollowable_links_skipped() {
        let html = r##"
            <a href="JavaScript:void(0)">menu</a>
            <a href="mailto:info@kupi.cz">mail</a>
            <a href="tel:+420123456789">tel</a>
            <a href="data:text/html,x">data</a>
            <a href="/letak.pdf" download>pdf</a>
            <a href="#nahoru">nahoru</a>
            <a href="ftp://files.kupi.cz/x">ftp</a>
        "##;
        assert!(extract_links(html, &listing()).is_empty());
    }

    #[test]
    fn test_canonical_link_and_dedup() {
        let html = r#"<html><head><link rel="canonical" href="/slevy/maso"></head>
            <body><a href="/slevy/drubez">a</a><a href="/slevy/maso">b</a><a href="/slevy/drubez">c</a></body></html>"#;
        assert_eq!(
            extract_links(html, &listing()),
            vec!["https://www.kupi.cz/slevy/drubez", "https://www.kupi.cz/slevy/maso"]
        );
    }

    #[test]
    fn test_select_anchors_collapses_whitespace() {
        let html = r#"
            <nav>
                <a class="category" href="/shop/fruit">  Fresh
                    Fruit </a>
                <a class="category" href="/shop/dairy">Dairy</a>
                <a class="category">No link</a>
                <a class="category" href="/shop/fruit">Fruit again</a>
                <a href="/about">About</a>
            </nav>
        "#;
        let base = Url::parse("https://shop.example.com/").unwrap();
        assert_eq!(
            select_anchors(html, "a.category", &base),
            vec![
                Anchor {
                    url: "https://shop.example.com/shop/fruit".to_string(),
                    text: "Fresh Fruit".to_string(),
                },
                Anchor {
                    url: "https://shop.example.com/shop/dairy".to_string(),
                    text: "Dairy".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_select_anchors_invalid_selector() {
        assert!(select_anchors("<a href='/x'>x</a>", "a[", &listing()).is_empty());
    }
}
