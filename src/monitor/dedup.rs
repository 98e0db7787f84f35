//! Finding deduplication
//!
//! A finding is identified by `(customer, run type, category, title, url,
//! period)`. The same condition detected twice in one period is stored once;
//! in a new period it is stored again.

use chrono::{DateTime, Datelike, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::store::{Store, StoreResult};
use crate::types::{Finding, FindingCategory, NewFinding, RunType};

/// Coarse time bucket scoping deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Period(String);

impl Period {
    /// Calendar day, `YYYY-MM-DD`
    pub fn daily(at: DateTime<Utc>) -> Self {
        Self(at.format("%Y-%m-%d").to_string())
    }

    /// ISO week, `YYYY-Www`
    pub fn weekly(at: DateTime<Utc>) -> Self {
        let week = at.iso_week();
        Self(format!("{}-W{:02}", week.year(), week.week()))
    }

    pub fn for_run(run_type: RunType, at: DateTime<Utc>) -> Self {
        match run_type {
            RunType::Daily => Self::daily(at),
            RunType::Weekly => Self::weekly(at),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex SHA-256 of `customer|run_type|category|title|url|period`
pub fn dedupe_key(
    customer_id: &str,
    run_type: RunType,
    category: FindingCategory,
    title: &str,
    url: &str,
    period: &str,
) -> String {
    let joined = [customer_id, run_type.as_str(), category.as_str(), title, url, period].join("|");
    hex::encode(Sha256::digest(joined.as_bytes()))
}

/// Result of [`FindingDeduplicator::insert_finding`]
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(Finding),
    /// A finding with the same key already exists; nothing was written
    Deduped { dedupe_key: String },
}

impl InsertOutcome {
    pub fn inserted(self) -> Option<Finding> {
        match self {
            Self::Inserted(finding) => Some(finding),
            Self::Deduped { .. } => None,
        }
    }
}

/// Persists at most one finding per dedupe key
#[derive(Clone)]
pub struct FindingDeduplicator {
    store: Arc<dyn Store>,
}

impl FindingDeduplicator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn insert_finding(&self, finding: &NewFinding) -> StoreResult<InsertOutcome> {
        let key = dedupe_key(
            &finding.customer_id,
            finding.run_type,
            finding.category,
            &finding.title,
            &finding.url,
            &finding.period,
        );

        match self.store.insert_finding(finding, &key, Utc::now())? {
            Some(inserted) => Ok(InsertOutcome::Inserted(inserted)),
            None => {
                debug!(
                    customer_id = %finding.customer_id,
                    title = %finding.title,
                    url = %finding.url,
                    dedupe_key = %key,
                    "deduped"
                );
                Ok(InsertOutcome::Deduped { dedupe_key: key })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::Severity;
    use chrono::TimeZone;

    const BASE: [&str; 4] = ["cust-1", "Page no longer found", "https://a.test/p", "2024-01-15"];

    fn key_with(customer: &str, run_type: RunType, category: FindingCategory, title: &str, url: &str, period: &str) -> String {
        dedupe_key(customer, run_type, category, title, url, period)
    }

    #[test]
    fn test_dedupe_key_is_deterministic() {
        let [c, t, u, p] = BASE;
        let a = key_with(c, RunType::Daily, FindingCategory::Availability, t, u, p);
        let b = key_with(c, RunType::Daily, FindingCategory::Availability, t, u, p);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_dedupe_key_changes_with_each_field() {
        let [c, t, u, p] = BASE;
        let base = key_with(c, RunType::Daily, FindingCategory::Availability, t, u, p);
        let variants = [
            key_with("cust-2", RunType::Daily, FindingCategory::Availability, t, u, p),
            key_with(c, RunType::Weekly, FindingCategory::Availability, t, u, p),
            key_with(c, RunType::Daily, FindingCategory::BrokenLinks, t, u, p),
            key_with(c, RunType::Daily, FindingCategory::Availability, "Other", u, p),
            key_with(c, RunType::Daily, FindingCategory::Availability, t, "https://a.test/q", p),
            key_with(c, RunType::Daily, FindingCategory::Availability, t, u, "2024-01-16"),
        ];
        for variant in variants {
            assert_ne!(variant, base);
        }
    }

    #[test]
    fn test_periods() {
        let at = Utc.with_ymd_and_hms(2024, 12, 30, 8, 0, 0).unwrap();
        assert_eq!(Period::daily(at).as_str(), "2024-12-30");
        assert_eq!(Period::weekly(at).as_str(), "2025-W01");
        assert_eq!(Period::for_run(RunType::Weekly, at), Period::weekly(at));

        let mid = Utc.with_ymd_and_hms(2024, 3, 6, 23, 59, 0).unwrap();
        assert_eq!(Period::weekly(mid).to_string(), "2024-W10");
    }

    #[test]
    fn test_at_most_one_finding_per_key() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let dedup = FindingDeduplicator::new(store.clone());

        let mut finding = NewFinding {
            customer_id: "cust-1".to_string(),
            run_id: "run-1".to_string(),
            run_type: RunType::Daily,
            severity: Severity::Critical,
            category: FindingCategory::Availability,
            title: "Page no longer found".to_string(),
            details: "HTTP status: 200 -> 404".to_string(),
            url: "https://a.test/p".to_string(),
            period: "2024-01-15".to_string(),
        };

        assert!(matches!(dedup.insert_finding(&finding).unwrap(), InsertOutcome::Inserted(_)));
        assert!(matches!(dedup.insert_finding(&finding).unwrap(), InsertOutcome::Deduped { .. }));

        finding.run_id = "run-2".to_string();
        assert!(dedup.insert_finding(&finding).unwrap().inserted().is_none());

        finding.period = "2024-01-16".to_string();
        assert!(dedup.insert_finding(&finding).unwrap().inserted().is_some());

        assert_eq!(store.list_findings(Some("cust-1"), 10).unwrap().len(), 2);
    }
}
