//! Visible-text normalization for content hashing

use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::OnceLock;

static RE_DATE: OnceLock<Regex> = OnceLock::new();
static RE_TIME: OnceLock<Regex> = OnceLock::new();

/// Subtrees that never contribute visible content
const SKIPPED_TAGS: &[&str] = &[
    "head", "script", "style", "noscript", "template", "svg", "nav", "header", "footer",
];

/// Markers in `id`/`class` that identify consent and cookie banners
const NOISE_MARKERS: &[&str] = &["cookie", "consent", "gdpr"];

const MONTHS: &str = "jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

/// Visible text of `html` with chrome and banners removed, whitespace
/// collapsed, and dates/times replaced by `<date>` / `<time>`.
///
/// Two fetches of the same content hash identically even when a rendered
/// timestamp or cookie banner differs.
pub fn normalize_document_text(html: &str) -> String {
    document_text(&Html::parse_document(html))
}

pub(super) fn document_text(document: &Html) -> String {
    let mut parts = Vec::new();
    collect_visible_text(document.root_element(), &mut parts);

    let collapsed = parts
        .iter()
        .flat_map(|p| p.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");

    mask_timestamps(&collapsed)
}

fn collect_visible_text<'a>(element: ElementRef<'a>, out: &mut Vec<&'a str>) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push(text);
        } else if let Some(child_element) = ElementRef::wrap(child) {
            if !is_noise(child_element) {
                collect_visible_text(child_element, out);
            }
        }
    }
}

fn is_noise(element: ElementRef<'_>) -> bool {
    let value = element.value();
    if SKIPPED_TAGS.contains(&value.name()) {
        return true;
    }
    ["id", "class"].iter().any(|attr| {
        value
            .attr(attr)
            .map(|v| {
                let v = v.to_ascii_lowercase();
                NOISE_MARKERS.iter().any(|marker| v.contains(marker))
            })
            .unwrap_or(false)
    })
}

fn mask_timestamps(text: &str) -> String {
    let re_date = RE_DATE.get_or_init(|| {
        let pattern = format!(
            r"(?i)\b(?:\d{{4}}-\d{{2}}-\d{{2}}|\d{{1,2}}[/.]\d{{1,2}}[/.]\d{{2,4}}|(?:{m})\.?\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}}|\d{{1,2}}(?:st|nd|rd|th)?\s+(?:{m})\.?,?\s+\d{{4}})\b",
            m = MONTHS
        );
        Regex::new(&pattern).expect("MONTHS alternation guarantees a valid pattern")
    });
    let re_time = RE_TIME.get_or_init(|| {
        Regex::new(r"(?i)\b\d{1,2}:\d{2}(?::\d{2})?(?:\s?[ap]m)?\b").expect("literal pattern guarantees valid regex")
    });

    let dated = re_date.replace_all(text, "<date>");
    re_time.replace_all(&dated, "<time>").into_owned()
}
