//! Monitoring pipeline for sitewatch
//!
//! Re-crawls each customer's key pages and sitemap on a schedule, compares what
//! it sees against stored baselines and raises deduplicated findings.
//!
//! Key components:
//! - `normalize_url` / `extractor`: URL canonicalization and stable HTML signals
//! - `sitemap`: namespace-agnostic sitemap and sitemap-index parsing
//! - `RobotsGate`: robots.txt exclusion checks for the configured user agent
//! - `FetchScheduler`: fair round-robin fetch scheduling with per-domain 429 backoff
//! - `FetchEngine`: HTTP fetches with redirect tracking and error classification
//! - `crawl`: the controller loop driving the scheduler with a bounded worker pool
//! - `BaselineEngine` / `diff`: artifact baselines and severity classification
//! - `FindingDeduplicator`: at-most-one finding per dedupe key
//! - `RunOrchestrator`: daily and weekly runs with per-customer isolation

pub mod crawl;
pub mod dedup;
pub mod diff;
pub mod extractor;
pub mod fetcher;
pub mod orchestrator;
pub mod psi;
pub mod robots;
pub mod scheduler;
pub mod sitemap;

pub use crawl::{run_crawl, CrawlOptions, CrawlRecord, CrawlReport};
pub use dedup::{dedupe_key, FindingDeduplicator, InsertOutcome, Period};
pub use diff::{BaselineEngine, Classification, Observation, Thresholds};
pub use extractor::{normalize_document_text, PageSignals};
pub use fetcher::{FetchConfig, FetchEngine, FetchErrorKind, FetchResponse, PageFetcher};
pub use orchestrator::{CustomerOutcome, RunOrchestrator, RunSummary};
pub use robots::RobotsGate;
pub use scheduler::{DomainStats, FetchScheduler, FetchTask, RetryDecision, SchedulerConfig};
pub use sitemap::{SitemapCount, SitemapKind};

use url::Url;

/// Resolve `reference` against `base` and canonicalize the result.
///
/// - Rejects anything that is not http(s) (returns an empty string)
/// - Lowercases scheme and host, drops default ports
/// - Strips the fragment
/// - Strips trailing slashes from non-root paths
/// - Keeps the query string as given
///
/// An unparsable `base` is ignored, so absolute references still resolve.
pub fn normalize_url(base: &str, reference: &str) -> String {
    let reference = reference.trim();
    if reference.is_empty() && base.trim().is_empty() {
        return String::new();
    }

    let resolved = match Url::parse(base.trim()) {
        Ok(base_url) => base_url.join(reference),
        Err(_) => Url::parse(reference),
    };
    let Ok(mut url) = resolved else {
        return String::new();
    };

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return String::new();
    }

    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        url.set_path(if trimmed.is_empty() { "/" } else { trimmed });
    }

    url.to_string()
}

/// Host (with non-default port) of an absolute URL, lowercased.
///
/// This is the unit of rate limiting: every URL sharing an authority shares
/// one cooldown.
pub fn url_authority(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}
