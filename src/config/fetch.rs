//! HTTP fetch and scheduler configuration

use serde::{Deserialize, Serialize};

use super::DEFAULT_USER_AGENT;

/// HTTP fetch layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// User agent string (also used for robots.txt group matching)
    pub user_agent: String,
    /// Total request timeout (seconds)
    pub timeout_secs: u64,
    /// Connection timeout (seconds)
    pub connect_timeout_secs: u64,
    /// Attempts for transient failures (timeouts, connection errors, 5xx)
    pub max_attempts: u32,
    /// Base delay between transient retries (milliseconds), doubled per attempt
    pub retry_base_delay_ms: u64,
    /// Maximum redirects to follow
    pub max_redirects: usize,
    /// Maximum response body size (bytes)
    pub max_body_bytes: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 20,
            connect_timeout_secs: 10,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            max_redirects: 10,
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Fair scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Cooldown after the first 429 on a domain (milliseconds)
    pub initial_backoff_ms: u64,
    /// Growth factor per consecutive 429
    pub backoff_multiplier: f64,
    /// Relative jitter applied to each cooldown (0.2 = ±20%)
    pub jitter: f64,
    /// Cooldown cap (milliseconds)
    pub max_backoff_ms: u64,
    /// Attempts per URL before a rate-limited task is dropped
    pub max_attempts_per_url: u32,
    /// Total 429s after which a domain is abandoned for the run
    pub domain_429_ceiling: u32,
    /// Concurrent fetch workers
    pub max_concurrency: usize,
    /// Sleep while every remaining domain is cooling down (milliseconds)
    pub idle_poll_ms: u64,
    /// Accumulated idle time after which a crawl is aborted (seconds)
    pub max_idle_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter: 0.2,
            max_backoff_ms: 60_000,
            max_attempts_per_url: 3,
            domain_429_ceiling: 10,
            max_concurrency: 8,
            idle_poll_ms: 250,
            max_idle_secs: 120,
        }
    }
}
