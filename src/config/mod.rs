//! Configuration for sitewatch

mod fetch;
mod logging;
mod monitor;

pub use fetch::{FetchSettings, SchedulerSettings};
pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
pub use monitor::{PsiConfig, ThresholdsConfig, WeeklyConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default user agent for all outbound requests (pages, robots.txt, sitemaps)
pub const DEFAULT_USER_AGENT: &str = "SitewatchBot/1.0 (+https://github.com/sitewatch)";

/// Persistent store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sitewatch.db"),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    /// HTTP fetch layer
    #[serde(default)]
    pub fetch: FetchSettings,
    /// Fair scheduler and per-domain backoff
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Business thresholds for the diff engine
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub weekly: WeeklyConfig,
    /// PageSpeed Insights performance checks
    #[serde(default)]
    pub psi: PsiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to validated defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Render as TOML (used by `sitewatch init`)
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate all configuration fields.
    ///
    /// Collects every problem so they can be fixed in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Fetch parameters are required for any run
        if self.fetch.user_agent.trim().is_empty() {
            errors.push("fetch.user_agent must not be empty".to_string());
        }
        if self.fetch.timeout_secs == 0 {
            errors.push("fetch.timeout_secs must be positive".to_string());
        }
        if self.fetch.max_attempts == 0 {
            errors.push("fetch.max_attempts must be positive".to_string());
        }
        if self.fetch.max_body_bytes == 0 {
            errors.push("fetch.max_body_bytes must be positive".to_string());
        }

        // Scheduler
        if self.scheduler.initial_backoff_ms == 0 {
            errors.push("scheduler.initial_backoff_ms must be positive".to_string());
        }
        if self.scheduler.backoff_multiplier < 1.0 {
            errors.push("scheduler.backoff_multiplier must be >= 1.0".to_string());
        }
        if !(0.0..1.0).contains(&self.scheduler.jitter) {
            errors.push("scheduler.jitter must be between 0.0 and 1.0 (exclusive)".to_string());
        }
        if self.scheduler.max_backoff_ms < self.scheduler.initial_backoff_ms {
            errors.push("scheduler.max_backoff_ms must be >= initial_backoff_ms".to_string());
        }
        if self.scheduler.max_attempts_per_url == 0 {
            errors.push("scheduler.max_attempts_per_url must be positive".to_string());
        }
        if self.scheduler.domain_429_ceiling == 0 {
            errors.push("scheduler.domain_429_ceiling must be positive".to_string());
        }
        if self.scheduler.max_concurrency == 0 {
            errors.push("scheduler.max_concurrency must be positive".to_string());
        }
        if self.scheduler.idle_poll_ms == 0 || self.scheduler.idle_poll_ms >= 1000 {
            errors.push("scheduler.idle_poll_ms must be between 1 and 999".to_string());
        }

        // Thresholds
        let t = &self.thresholds;
        if t.sitemap_warning_drop_pct <= 0.0 || t.sitemap_critical_drop_pct <= 0.0 {
            errors.push("sitemap drop thresholds must be positive percentages".to_string());
        }
        if t.sitemap_critical_drop_pct < t.sitemap_warning_drop_pct {
            errors.push(
                "thresholds.sitemap_critical_drop_pct must be >= sitemap_warning_drop_pct".to_string(),
            );
        }
        if t.performance_critical_drop < t.performance_warning_drop {
            errors.push(
                "thresholds.performance_critical_drop must be >= performance_warning_drop".to_string(),
            );
        }

        // Weekly
        if self.weekly.crawl_limit == 0 {
            errors.push("weekly.crawl_limit must be positive".to_string());
        }

        // PSI
        if self.psi.enabled && self.psi.endpoint.trim().is_empty() {
            errors.push("psi.endpoint must be set when psi is enabled".to_string());
        }

        if self.store.path.as_os_str().is_empty() {
            errors.push("store.path must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
