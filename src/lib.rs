//! Sitewatch: scheduled monitoring of customer websites
//!
//! Detects SEO, indexability and availability regressions, featuring:
//! - URL normalization and namespace-agnostic sitemap parsing
//! - robots.txt exclusion checks for the crawler's own user agent
//! - A fair multi-customer fetch scheduler with per-domain 429 backoff
//! - Artifact baselines with severity-classified diffs
//! - Per-period finding deduplication
//! - Daily and weekly runs with per-customer failure isolation

pub mod config;
pub mod monitor;
pub mod notify;
pub mod store;
pub mod types;
pub mod util;

pub use config::Config;
pub use types::*;
