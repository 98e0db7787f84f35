//! Core types for the sitewatch pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a customer
pub type CustomerId = String;

/// Unique identifier for a monitoring run
pub type RunId = String;

// ============================================================================
// Content Identity
// ============================================================================

/// Exact content hash using SHA256 (64-character hex string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Compute SHA256 hash of content
    pub fn compute(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        ContentHash(hex::encode(hasher.finalize()))
    }

    /// Get the underlying string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Severity
// ============================================================================

/// Severity of a finding, ordered `Info < Warning < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a severity string is not one of `info`, `warning`, `critical`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized severity: {0:?}")]
pub struct SeverityParseError(pub String);

impl FromStr for Severity {
    type Err = SeverityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            _ => Err(SeverityParseError(s.to_string())),
        }
    }
}

/// Per-severity finding counts handed to alert sinks and run summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.warning + self.info
    }

    pub fn from_findings<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            counts.add(finding.severity);
        }
        counts
    }
}

// ============================================================================
// Run / Finding / Artifact classifiers
// ============================================================================

/// Which pipeline produced a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Daily,
    Weekly,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(format!("unknown run type: {}", other)),
        }
    }
}

/// Category of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    /// Processing of the customer itself failed
    System,
    Robots,
    Sitemap,
    /// Canonical / meta-robots signals
    Indexability,
    /// Title and visible content
    Content,
    /// HTTP status of monitored pages
    Availability,
    BrokenLinks,
    Performance,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Robots => "robots",
            Self::Sitemap => "sitemap",
            Self::Indexability => "indexability",
            Self::Content => "content",
            Self::Availability => "availability",
            Self::BrokenLinks => "broken_links",
            Self::Performance => "performance",
        }
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FindingCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "system" => Self::System,
            "robots" => Self::Robots,
            "sitemap" => Self::Sitemap,
            "indexability" => Self::Indexability,
            "content" => Self::Content,
            "availability" => Self::Availability,
            "broken_links" => Self::BrokenLinks,
            "performance" => Self::Performance,
            other => return Err(format!("unknown finding category: {}", other)),
        })
    }
}

/// Kind of snapshot stored as an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    RobotsTxt,
    /// Sitemap URL count (raw content is the decimal count)
    Sitemap,
    MetaRobots,
    Canonical,
    Title,
    /// HTTP status code of a page (raw content is the decimal status)
    HttpStatus,
    /// Normalized visible text of a page
    PageText,
    /// PageSpeed performance score, 0-100
    Performance,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RobotsTxt => "robots_txt",
            Self::Sitemap => "sitemap",
            Self::MetaRobots => "meta_robots",
            Self::Canonical => "canonical",
            Self::Title => "title",
            Self::HttpStatus => "http_status",
            Self::PageText => "page_text",
            Self::Performance => "performance",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "robots_txt" => Self::RobotsTxt,
            "sitemap" => Self::Sitemap,
            "meta_robots" => Self::MetaRobots,
            "canonical" => Self::Canonical,
            "title" => Self::Title,
            "http_status" => Self::HttpStatus,
            "page_text" => Self::PageText,
            "performance" => Self::Performance,
            other => return Err(format!("unknown artifact kind: {}", other)),
        })
    }
}

// ============================================================================
// Persistent records
// ============================================================================

/// A monitored customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
    /// Site root, e.g. `https://example.com/`
    pub base_url: String,
    /// Explicit sitemap location; falls back to robots.txt `Sitemap:` then `/sitemap.xml`
    pub sitemap_url: Option<String>,
    /// Per-customer override of the weekly crawl limit
    pub crawl_limit: Option<usize>,
    /// Only active customers are eligible for runs
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a customer
#[derive(Debug, Clone, Default)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub base_url: String,
    pub sitemap_url: Option<String>,
    pub crawl_limit: Option<usize>,
}

/// A key page monitored daily for a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub customer_id: CustomerId,
    pub url: String,
    pub label: Option<String>,
}

/// Immutable snapshot of something observed for a customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub customer_id: CustomerId,
    pub kind: ArtifactKind,
    /// URL or identifier the artifact describes
    pub subject: String,
    pub content_hash: ContentHash,
    pub raw_content: String,
    pub fetched_at: DateTime<Utc>,
}

/// Fields for appending an artifact
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub customer_id: CustomerId,
    pub kind: ArtifactKind,
    pub subject: String,
    pub raw_content: String,
    pub fetched_at: DateTime<Utc>,
}

impl NewArtifact {
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::compute(&self.raw_content)
    }
}

/// A persisted, severity-classified alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub customer_id: CustomerId,
    pub run_id: RunId,
    pub run_type: RunType,
    pub severity: Severity,
    pub category: FindingCategory,
    pub title: String,
    pub details: String,
    pub url: String,
    pub dedupe_key: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for a finding before its dedupe key is derived
#[derive(Debug, Clone)]
pub struct NewFinding {
    pub customer_id: CustomerId,
    pub run_id: RunId,
    pub run_type: RunType,
    pub severity: Severity,
    pub category: FindingCategory,
    pub title: String,
    pub details: String,
    pub url: String,
    /// Coarse time bucket, see [`crate::monitor::dedup::Period`]
    pub period: String,
}

/// Aggregate per-customer counters for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCoverage {
    pub customer_id: CustomerId,
    pub run_id: RunId,
    pub run_type: RunType,
    pub total_urls: u64,
    pub sampled_urls: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub http_429_count: u64,
    pub http_404_count: u64,
    pub broken_link_count: u64,
}

impl RunCoverage {
    pub fn new(customer_id: &str, run_id: &str, run_type: RunType) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            run_id: run_id.to_string(),
            run_type,
            total_urls: 0,
            sampled_urls: 0,
            success_count: 0,
            error_count: 0,
            http_429_count: 0,
            http_404_count: 0,
            broken_link_count: 0,
        }
    }
}

/// Per-fetch record of a key page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub customer_id: CustomerId,
    pub url: String,
    pub status_code: Option<u16>,
    pub final_url: String,
    pub content_hash: Option<ContentHash>,
    pub fetched_at: DateTime<Utc>,
}
