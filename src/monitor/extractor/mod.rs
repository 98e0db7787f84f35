//! Stable signal extraction from HTML
//!
//! Every extractor is best-effort: an absent or malformed field yields an
//! empty string, never an error.

mod text;

pub use text::normalize_document_text;

use scraper::{Html, Selector};
use std::collections::HashSet;

use super::normalize_url;
use crate::types::ContentHash;

/// Signals tracked per key page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSignals {
    pub title: String,
    pub canonical: String,
    pub meta_robots: String,
    /// Normalized visible text, see [`normalize_document_text`]
    pub text: String,
    /// Hash of `text`
    pub content_hash: ContentHash,
}

impl PageSignals {
    /// Extract all signals from a single parse of `html`
    pub fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);
        let text = text::document_text(&document);
        Self {
            title: title_of(&document),
            canonical: canonical_of(&document),
            meta_robots: meta_robots_of(&document),
            content_hash: ContentHash::compute(&text),
            text,
        }
    }
}

/// First non-empty `<title>`, whitespace collapsed
pub fn extract_title(html: &str) -> String {
    title_of(&Html::parse_document(html))
}

/// `href` of the first `<link rel="canonical">`
pub fn extract_canonical(html: &str) -> String {
    canonical_of(&Html::parse_document(html))
}

/// `content` of `<meta name="robots">` (name matched case-insensitively)
pub fn extract_meta_robots(html: &str) -> String {
    meta_robots_of(&Html::parse_document(html))
}

/// Normalized absolute http(s) links from `a[href]`, deduplicated in document order
pub fn extract_links(html: &str, base: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let url = normalize_url(base, href);
        if !url.is_empty() && seen.insert(url.clone()) {
            links.push(url);
        }
    }
    links
}

fn title_of(document: &Html) -> String {
    let Ok(selector) = Selector::parse("title") else {
        return String::new();
    };
    document
        .select(&selector)
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

fn canonical_of(document: &Html) -> String {
    let Ok(selector) = Selector::parse("link[rel][href]") else {
        return String::new();
    };
    document
        .select(&selector)
        .filter(|el| {
            el.value()
                .attr("rel")
                .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("canonical")))
                .unwrap_or(false)
        })
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .map(str::to_string)
        .unwrap_or_default()
}

fn meta_robots_of(document: &Html) -> String {
    let Ok(selector) = Selector::parse("meta[name][content]") else {
        return String::new();
    };
    document
        .select(&selector)
        .filter(|el| {
            el.value()
                .attr("name")
                .map(|name| name.trim().eq_ignore_ascii_case("robots"))
                .unwrap_or(false)
        })
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
        .unwrap_or_default()
}
