//! HTTP fetch layer
//!
//! Network failures never surface as `Err`: every call produces a
//! [`FetchResponse`] whose `error_kind` says what went wrong. Transient
//! failures (timeouts, DNS and connection errors, 5xx) are retried here with
//! exponential delay. 4xx responses, 429 included, are returned at once; the
//! scheduler owns 429 policy.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::FetchSettings;

/// Classification of a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    #[error("timeout")]
    Timeout,
    #[error("dns")]
    Dns,
    #[error("connection")]
    Connection,
    #[error("http_4xx")]
    Http4xx,
    #[error("http_5xx")]
    Http5xx,
    #[error("unknown")]
    Unknown,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::Connection => "connection",
            Self::Http4xx => "http_4xx",
            Self::Http5xx => "http_5xx",
            Self::Unknown => "unknown",
        }
    }

    /// Worth another attempt at this layer
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Dns | Self::Connection | Self::Http5xx)
    }

    fn from_status(status: u16) -> Option<Self> {
        match status {
            400..=499 => Some(Self::Http4xx),
            500..=599 => Some(Self::Http5xx),
            _ => None,
        }
    }
}

/// Errors constructing the fetch engine
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result of fetching one URL
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    /// Final HTTP status, `None` when no response was received
    pub status_code: Option<u16>,
    pub final_url: String,
    /// URLs that answered with a redirect, in order
    pub redirect_chain: Vec<String>,
    pub body: String,
    pub content_type: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<FetchErrorKind>,
    /// Parsed `Retry-After` header, when present
    pub retry_after: Option<Duration>,
    /// Attempts made, including the final one
    pub attempts: u32,
}

impl FetchResponse {
    /// Response carrying only a status and body (no error, no redirects)
    pub fn with_status(url: &str, status: u16, body: impl Into<String>) -> Self {
        Self {
            status_code: Some(status),
            final_url: url.to_string(),
            body: body.into(),
            error_kind: FetchErrorKind::from_status(status),
            error: FetchErrorKind::from_status(status).map(|_| format!("HTTP {}", status)),
            attempts: 1,
            ..Default::default()
        }
    }

    /// Response for a request that never got an HTTP answer
    pub fn failed(url: &str, kind: FetchErrorKind, error: impl Into<String>) -> Self {
        Self {
            final_url: url.to_string(),
            error: Some(error.into()),
            error_kind: Some(kind),
            attempts: 1,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status_code, Some(200..=299))
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status_code == Some(429)
    }

    /// 404 or 410
    pub fn is_not_found(&self) -> bool {
        matches!(self.status_code, Some(404) | Some(410))
    }

    pub fn is_html(&self) -> bool {
        match &self.content_type {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml")
            }
            None => {
                let head = self.body.trim_start().as_bytes();
                let head = &head[..head.len().min(512)];
                head.len() >= 5 && head.windows(5).any(|w| w.eq_ignore_ascii_case(b"<html"))
            }
        }
    }
}

/// Anything that can fetch a URL; implemented by [`FetchEngine`] and by test doubles
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResponse;
}

/// Configuration for the fetch engine
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub max_redirects: usize,
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from_settings(&FetchSettings::default())
    }
}

impl FetchConfig {
    pub fn from_settings(settings: &FetchSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            max_attempts: settings.max_attempts.max(1),
            retry_base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_redirects: settings.max_redirects,
            max_body_bytes: settings.max_body_bytes,
        }
    }
}

/// reqwest-backed fetcher
pub struct FetchEngine {
    http_client: reqwest::Client,
    config: FetchConfig,
}

impl FetchEngine {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch with retries for transient failures
    pub async fn fetch_url(&self, url: &str) -> FetchResponse {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut response = self.fetch_once(url).await;
            response.attempts = attempt;

            let transient = response.error_kind.map_or(false, |k| k.is_transient());
            if !transient || attempt >= self.config.max_attempts {
                return response;
            }

            let delay = self.config.retry_base_delay * 2u32.saturating_pow(attempt - 1);
            debug!(
                url,
                attempt,
                kind = response.error_kind.map(|k| k.as_str()).unwrap_or("none"),
                delay_ms = delay.as_millis() as u64,
                "transient fetch failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One attempt, following redirects by hand so the chain is recorded
    async fn fetch_once(&self, url: &str) -> FetchResponse {
        let mut current = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => return FetchResponse::failed(url, FetchErrorKind::Unknown, format!("invalid URL: {}", e)),
        };
        let mut chain = Vec::new();

        loop {
            let response = match self.http_client.get(current.as_str()).send().await {
                Ok(r) => r,
                Err(e) => {
                    let mut failed = FetchResponse::failed(current.as_str(), classify_error(&e), e.to_string());
                    failed.redirect_chain = chain;
                    return failed;
                }
            };

            let status = response.status();
            if status.is_redirection() {
                let next = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|location| current.join(location).ok());
                if let Some(next) = next {
                    if chain.len() >= self.config.max_redirects {
                        let mut failed = FetchResponse::failed(
                            current.as_str(),
                            FetchErrorKind::Unknown,
                            format!("too many redirects (>{})", self.config.max_redirects),
                        );
                        failed.status_code = Some(status.as_u16());
                        failed.redirect_chain = chain;
                        return failed;
                    }
                    chain.push(current.to_string());
                    current = next;
                    continue;
                }
            }

            let headers = response.headers().clone();
            let code = status.as_u16();
            let mut result = FetchResponse {
                status_code: Some(code),
                final_url: current.to_string(),
                redirect_chain: chain,
                content_type: headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                retry_after: parse_retry_after(&headers),
                error_kind: FetchErrorKind::from_status(code),
                error: FetchErrorKind::from_status(code).map(|_| format!("HTTP {}", code)),
                attempts: 1,
                ..Default::default()
            };

            match self.read_body(response).await {
                Ok(body) => result.body = body,
                Err(e) => {
                    result.error_kind = Some(classify_error(&e));
                    result.error = Some(format!("failed reading body: {}", e));
                }
            }
            return result;
        }
    }

    /// Read at most `max_body_bytes`; the rest is discarded
    async fn read_body(&self, mut response: reqwest::Response) -> Result<String, reqwest::Error> {
        let limit = self.config.max_body_bytes;
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = limit.saturating_sub(buf.len());
            if chunk.len() >= room {
                buf.extend_from_slice(&chunk[..room]);
                debug!(limit, "response body truncated");
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[async_trait]
impl PageFetcher for FetchEngine {
    async fn fetch(&self, url: &str) -> FetchResponse {
        self.fetch_url(url).await
    }
}

/// Map a reqwest error onto the fetch error taxonomy
fn classify_error(error: &reqwest::Error) -> FetchErrorKind {
    if error.is_timeout() {
        return FetchErrorKind::Timeout;
    }
    if error.is_connect() || error.is_request() {
        let mut chain = error.to_string().to_ascii_lowercase();
        let mut source = std::error::Error::source(error);
        while let Some(inner) = source {
            chain.push(' ');
            chain.push_str(&inner.to_string().to_ascii_lowercase());
            source = inner.source();
        }
        if chain.contains("dns") || chain.contains("failed to lookup") || chain.contains("name or service not known") {
            return FetchErrorKind::Dns;
        }
        if error.is_connect() {
            return FetchErrorKind::Connection;
        }
    }
    if error.is_body() || error.is_decode() {
        return FetchErrorKind::Connection;
    }
    FetchErrorKind::Unknown
}

/// `Retry-After` as delta-seconds or an HTTP date
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or_default())
}
