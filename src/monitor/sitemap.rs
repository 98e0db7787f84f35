//! Sitemap and sitemap-index parsing
//!
//! Matching is done on local tag names, so `<urlset>`, `<sm:urlset>` and a
//! urlset in any namespace are all treated the same. Nothing here fails: blank,
//! malformed or unrecognized input degrades to a zero count with a kind that
//! says why.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a sitemap document turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitemapKind {
    /// `<urlset>` of page URLs
    UrlSet,
    /// `<sitemapindex>` of child sitemaps
    Index,
    /// Blank input
    Empty,
    /// Not well-formed XML
    ParseError,
    /// Well-formed XML with an unrecognized root element
    Unknown,
}

impl SitemapKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UrlSet => "urlset",
            Self::Index => "index",
            Self::Empty => "empty",
            Self::ParseError => "parse_error",
            Self::Unknown => "unknown",
        }
    }

    fn from_root(local_name: &[u8]) -> Self {
        match local_name {
            b"urlset" => Self::UrlSet,
            b"sitemapindex" => Self::Index,
            _ => Self::Unknown,
        }
    }

    /// Local name of the per-entry element for this kind
    fn entry_tag(&self) -> Option<&'static [u8]> {
        match self {
            Self::UrlSet => Some(&b"url"[..]),
            Self::Index => Some(&b"sitemap"[..]),
            _ => None,
        }
    }
}

impl fmt::Display for SitemapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry count of a sitemap document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapCount {
    pub count: usize,
    pub kind: SitemapKind,
}

/// A fully parsed sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapDocument {
    pub kind: SitemapKind,
    /// Number of `<url>` (urlset) or `<sitemap>` (index) entries
    pub entries: usize,
    /// Trimmed, non-empty `<loc>` values in document order
    pub locations: Vec<String>,
    /// Why the document was rejected, for `ParseError`
    pub reason: Option<String>,
}

impl SitemapDocument {
    fn degraded(kind: SitemapKind, reason: Option<String>) -> Self {
        Self {
            kind,
            entries: 0,
            locations: Vec::new(),
            reason,
        }
    }

    pub fn count(&self) -> SitemapCount {
        SitemapCount {
            count: self.entries,
            kind: self.kind,
        }
    }
}

/// Count the entries of a sitemap or sitemap index
pub fn extract_url_count(xml: &str) -> SitemapCount {
    parse(xml).count()
}

/// List `<loc>` values of a sitemap or sitemap index; empty on any failure
pub fn list_urls(xml: &str) -> Vec<String> {
    parse(xml).locations
}

/// Parse a sitemap document in a single pass
pub fn parse(xml: &str) -> SitemapDocument {
    if xml.trim().is_empty() {
        return SitemapDocument::degraded(SitemapKind::Empty, None);
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut kind: Option<SitemapKind> = None;
    let mut depth = 0usize;
    let mut entries = 0usize;
    let mut locations = Vec::new();
    let mut in_entry = false;
    let mut loc_buf: Option<String> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return SitemapDocument::degraded(
                    SitemapKind::ParseError,
                    Some(format!("malformed XML at byte {}: {}", reader.buffer_position(), e)),
                );
            }
        };

        match event {
            Event::Start(ref e) => {
                let name = e.local_name();
                let name = name.as_ref();
                if depth == 0 {
                    if kind.is_some() {
                        return SitemapDocument::degraded(
                            SitemapKind::ParseError,
                            Some("multiple root elements".to_string()),
                        );
                    }
                    kind = Some(SitemapKind::from_root(name));
                } else if depth == 1 && kind.and_then(|k| k.entry_tag()) == Some(name) {
                    entries += 1;
                    in_entry = true;
                } else if depth == 2 && in_entry && name == b"loc" {
                    loc_buf = Some(String::new());
                }
                depth += 1;
            }
            Event::Empty(ref e) => {
                let name = e.local_name();
                let name = name.as_ref();
                if depth == 0 {
                    if kind.is_some() {
                        return SitemapDocument::degraded(
                            SitemapKind::ParseError,
                            Some("multiple root elements".to_string()),
                        );
                    }
                    kind = Some(SitemapKind::from_root(name));
                } else if depth == 1 && kind.and_then(|k| k.entry_tag()) == Some(name) {
                    entries += 1;
                }
            }
            Event::Text(ref e) => {
                if let Some(buf) = loc_buf.as_mut() {
                    if let Ok(text) = e.unescape() {
                        buf.push_str(&text);
                    }
                }
            }
            Event::CData(ref e) => {
                if let Some(buf) = loc_buf.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::End(ref e) => {
                depth = depth.saturating_sub(1);
                if depth == 2 && e.local_name().as_ref() == b"loc" {
                    if let Some(loc) = loc_buf.take() {
                        let loc = loc.trim();
                        if !loc.is_empty() {
                            locations.push(loc.to_string());
                        }
                    }
                } else if depth == 1 {
                    in_entry = false;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return SitemapDocument::degraded(
            SitemapKind::ParseError,
            Some(format!("unexpected end of document with {} unclosed element(s)", depth)),
        );
    }

    match kind {
        None => SitemapDocument::degraded(
            SitemapKind::ParseError,
            Some("no root element".to_string()),
        ),
        Some(SitemapKind::Unknown) => SitemapDocument::degraded(SitemapKind::Unknown, None),
        Some(kind) => SitemapDocument {
            kind,
            entries,
            locations,
            reason: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(
            extract_url_count(""),
            SitemapCount { count: 0, kind: SitemapKind::Empty }
        );
        assert_eq!(extract_url_count("  \n\t").kind, SitemapKind::Empty);
    }

    #[test]
    fn malformed_xml_is_parse_error() {
        for xml in [
            "<urlset><url><loc>https://a.test/</loc></url>",
            "<urlset><url></urlset>",
            "just some text",
            "<urlset></urlset><urlset></urlset>",
        ] {
            let doc = parse(xml);
            assert_eq!(doc.kind, SitemapKind::ParseError, "{:?}", xml);
            assert_eq!(doc.entries, 0);
            assert!(doc.reason.is_some());
        }
    }

    #[test]
    fn counts_urlset_with_or_without_namespace() {
        let plain = "<urlset><url><loc>a</loc></url><url><loc>b</loc></url><url/></urlset>";
        assert_eq!(
            extract_url_count(plain),
            SitemapCount { count: 3, kind: SitemapKind::UrlSet }
        );

        let namespaced = r#"<?xml version="1.0" encoding="UTF-8"?>
<sm:urlset xmlns:sm="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sm:url><sm:loc>https://a.test/1</sm:loc></sm:url>
  <sm:url><sm:loc>https://a.test/2</sm:loc></sm:url>
  <sm:url><sm:loc>https://a.test/3</sm:loc></sm:url>
</sm:urlset>"#;
        assert_eq!(
            extract_url_count(namespaced),
            SitemapCount { count: 3, kind: SitemapKind::UrlSet }
        );
    }

    #[test]
    fn counts_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://a.test/s1.xml</loc></sitemap>
  <sitemap><loc>https://a.test/s2.xml</loc><lastmod>2024-01-01</lastmod></sitemap>
</sitemapindex>"#;
        assert_eq!(
            extract_url_count(xml),
            SitemapCount { count: 2, kind: SitemapKind::Index }
        );
        assert_eq!(list_urls(xml), vec!["https://a.test/s1.xml", "https://a.test/s2.xml"]);
    }

    #[test]
    fn unknown_root_counts_zero() {
        assert_eq!(
            extract_url_count("<rss><channel/></rss>"),
            SitemapCount { count: 0, kind: SitemapKind::Unknown }
        );
        assert!(list_urls("<rss><channel/></rss>").is_empty());
    }

    #[test]
    fn list_urls_trims_and_skips_empty_locs() {
        let xml = r#"<urlset>
  <url><loc>
     https://a.test/one
  </loc></url>
  <url><loc>   </loc></url>
  <url><loc><![CDATA[https://a.test/two?x=1&y=2]]></loc></url>
  <url><loc>https://a.test/three?a=1&amp;b=2</loc></url>
</urlset>"#;
        assert_eq!(
            list_urls(xml),
            vec![
                "https://a.test/one",
                "https://a.test/two?x=1&y=2",
                "https://a.test/three?a=1&b=2",
            ]
        );
        assert_eq!(extract_url_count(xml).count, 4);
    }

    #[test]
    fn list_urls_is_empty_on_parse_failure() {
        assert!(list_urls("<urlset><url><loc>https://a.test/</loc>").is_empty());
    }

    #[test]
    fn nested_locs_outside_entries_are_ignored() {
        let xml = "<urlset><loc>stray</loc><url><image><loc>img</loc></image><loc>page</loc></url></urlset>";
        assert_eq!(list_urls(xml), vec!["page"]);
    }
}
