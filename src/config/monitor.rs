//! Change-detection thresholds, weekly crawl and PageSpeed configuration

use serde::{Deserialize, Serialize};

/// Severity thresholds for numeric diffs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// Sitemap URL count drop (percent) that raises a warning
    pub sitemap_warning_drop_pct: f64,
    /// Sitemap URL count drop (percent) that raises a critical finding
    pub sitemap_critical_drop_pct: f64,
    /// Performance score drop (points, 0-100 scale) that raises a warning
    pub performance_warning_drop: f64,
    /// Performance score drop (points) that raises a critical finding
    pub performance_critical_drop: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            sitemap_warning_drop_pct: 10.0,
            sitemap_critical_drop_pct: 30.0,
            performance_warning_drop: 10.0,
            performance_critical_drop: 25.0,
        }
    }
}

/// Weekly sitemap crawl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeeklyConfig {
    /// Maximum URLs sampled per customer (customer setting overrides)
    pub crawl_limit: usize,
    /// Follow one hop of internal links from fetched pages
    pub check_broken_links: bool,
    /// Maximum extra link checks per customer
    pub max_link_checks: usize,
    /// Maximum child sitemaps fetched from a sitemap index
    pub max_child_sitemaps: usize,
}

impl Default for WeeklyConfig {
    fn default() -> Self {
        Self {
            crawl_limit: 200,
            check_broken_links: true,
            max_link_checks: 200,
            max_child_sitemaps: 10,
        }
    }
}

/// PageSpeed Insights configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PsiConfig {
    pub enabled: bool,
    /// API key, optional for low-volume use
    pub api_key: Option<String>,
    pub endpoint: String,
    /// `mobile` or `desktop`
    pub strategy: String,
    pub timeout_secs: u64,
}

impl Default for PsiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            endpoint: "https://www.googleapis.com/pagespeedonline/v5/runPagespeed".to_string(),
            strategy: "mobile".to_string(),
            timeout_secs: 60,
        }
    }
}
