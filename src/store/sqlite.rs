//! SQLite-backed store

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::schema::SCHEMA;
use super::{Store, StoreError, StoreResult};
use crate::types::{
    Artifact, ArtifactKind, ContentHash, Customer, Finding, NewArtifact, NewCustomer, NewFinding,
    RunCoverage, RunType, Snapshot, Target,
};

const CUSTOMER_COLUMNS: &str =
    "id, name, email, base_url, sitemap_url, crawl_limit, active, created_at";
const ARTIFACT_COLUMNS: &str =
    "id, customer_id, kind, subject, content_hash, raw_content, fetched_at";
const FINDING_COLUMNS: &str =
    "id, customer_id, run_id, run_type, severity, category, title, details, url, dedupe_key, created_at";

/// Store on a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::InvalidData(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        debug!(path = %path.display(), "opening store");
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<Customer> {
    let crawl_limit: Option<i64> = row.get(5)?;
    Ok(Customer {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        base_url: row.get(3)?,
        sitemap_url: row.get(4)?,
        crawl_limit: crawl_limit.and_then(|v| usize::try_from(v).ok()),
        active: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn target_from_row(row: &Row<'_>) -> rusqlite::Result<Target> {
    Ok(Target {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        url: row.get(2)?,
        label: row.get(3)?,
    })
}

/// Artifact row before its kind is validated
struct ArtifactRow {
    id: i64,
    customer_id: String,
    kind: String,
    subject: String,
    content_hash: String,
    raw_content: String,
    fetched_at: DateTime<Utc>,
}

impl ArtifactRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            kind: row.get(2)?,
            subject: row.get(3)?,
            content_hash: row.get(4)?,
            raw_content: row.get(5)?,
            fetched_at: row.get(6)?,
        })
    }

    fn into_artifact(self) -> StoreResult<Artifact> {
        Ok(Artifact {
            id: self.id,
            customer_id: self.customer_id,
            kind: self.kind.parse().map_err(StoreError::InvalidData)?,
            subject: self.subject,
            content_hash: ContentHash(self.content_hash),
            raw_content: self.raw_content,
            fetched_at: self.fetched_at,
        })
    }
}

/// Finding row before its enums are validated
struct FindingRow {
    id: i64,
    customer_id: String,
    run_id: String,
    run_type: String,
    severity: String,
    category: String,
    title: String,
    details: String,
    url: String,
    dedupe_key: String,
    created_at: DateTime<Utc>,
}

impl FindingRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            run_id: row.get(2)?,
            run_type: row.get(3)?,
            severity: row.get(4)?,
            category: row.get(5)?,
            title: row.get(6)?,
            details: row.get(7)?,
            url: row.get(8)?,
            dedupe_key: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_finding(self) -> StoreResult<Finding> {
        Ok(Finding {
            id: self.id,
            customer_id: self.customer_id,
            run_id: self.run_id,
            run_type: self.run_type.parse().map_err(StoreError::InvalidData)?,
            severity: self
                .severity
                .parse()
                .map_err(|e: crate::types::SeverityParseError| StoreError::InvalidData(e.to_string()))?,
            category: self.category.parse().map_err(StoreError::InvalidData)?,
            title: self.title,
            details: self.details,
            url: self.url,
            dedupe_key: self.dedupe_key,
            created_at: self.created_at,
        })
    }
}

fn collect_findings(rows: Vec<FindingRow>) -> StoreResult<Vec<Finding>> {
    rows.into_iter().map(FindingRow::into_finding).collect()
}

// ============================================================================
// Store implementation
// ============================================================================

impl Store for SqliteStore {
    fn create_customer(&self, customer: &NewCustomer) -> StoreResult<Customer> {
        let created = Customer {
            id: uuid::Uuid::new_v4().to_string(),
            name: customer.name.clone(),
            email: customer.email.clone(),
            base_url: customer.base_url.clone(),
            sitemap_url: customer.sitemap_url.clone(),
            crawl_limit: customer.crawl_limit,
            active: true,
            created_at: Utc::now(),
        };

        self.conn.lock().execute(
            "INSERT INTO customers (id, name, email, base_url, sitemap_url, crawl_limit, active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                created.id,
                created.name,
                created.email,
                created.base_url,
                created.sitemap_url,
                created.crawl_limit.map(|v| to_i64(v as u64)),
                created.active,
                created.created_at,
            ],
        )?;
        Ok(created)
    }

    fn get_customer(&self, customer_id: &str) -> StoreResult<Option<Customer>> {
        let conn = self.conn.lock();
        let customer = conn
            .query_row(
                &format!("SELECT {} FROM customers WHERE id = ?1", CUSTOMER_COLUMNS),
                params![customer_id],
                customer_from_row,
            )
            .optional()?;
        Ok(customer)
    }

    fn list_customers(&self, active_only: bool) -> StoreResult<Vec<Customer>> {
        let conn = self.conn.lock();
        let sql = if active_only {
            format!(
                "SELECT {} FROM customers WHERE active = 1 ORDER BY created_at, id",
                CUSTOMER_COLUMNS
            )
        } else {
            format!("SELECT {} FROM customers ORDER BY created_at, id", CUSTOMER_COLUMNS)
        };
        let mut stmt = conn.prepare(&sql)?;
        let customers = stmt
            .query_map([], customer_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(customers)
    }

    fn set_customer_active(&self, customer_id: &str, active: bool) -> StoreResult<()> {
        let changed = self.conn.lock().execute(
            "UPDATE customers SET active = ?1 WHERE id = ?2",
            params![active, customer_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("customer {}", customer_id)));
        }
        Ok(())
    }

    fn add_target(&self, customer_id: &str, url: &str, label: Option<&str>) -> StoreResult<Target> {
        let conn = self.conn.lock();
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM customers WHERE id = ?1",
                params![customer_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("customer {}", customer_id)));
        }

        conn.execute(
            "INSERT INTO targets (customer_id, url, label) VALUES (?1, ?2, ?3) \
             ON CONFLICT (customer_id, url) DO NOTHING",
            params![customer_id, url, label],
        )?;
        let target = conn.query_row(
            "SELECT id, customer_id, url, label FROM targets WHERE customer_id = ?1 AND url = ?2",
            params![customer_id, url],
            target_from_row,
        )?;
        Ok(target)
    }

    fn list_targets(&self, customer_id: &str) -> StoreResult<Vec<Target>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, customer_id, url, label FROM targets WHERE customer_id = ?1 ORDER BY id",
        )?;
        let targets = stmt
            .query_map(params![customer_id], target_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(targets)
    }

    fn record_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO snapshots (customer_id, url, status_code, final_url, content_hash, fetched_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snapshot.customer_id,
                snapshot.url,
                snapshot.status_code.map(i64::from),
                snapshot.final_url,
                snapshot.content_hash.as_ref().map(|h| h.as_str()),
                snapshot.fetched_at,
            ],
        )?;
        Ok(())
    }

    fn latest_artifact(
        &self,
        customer_id: &str,
        kind: ArtifactKind,
        subject: &str,
    ) -> StoreResult<Option<Artifact>> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!(
                    "SELECT {} FROM artifacts WHERE customer_id = ?1 AND kind = ?2 AND subject = ?3 \
                     ORDER BY fetched_at DESC, id DESC LIMIT 1",
                    ARTIFACT_COLUMNS
                ),
                params![customer_id, kind.as_str(), subject],
                ArtifactRow::read,
            )
            .optional()?
        };
        row.map(ArtifactRow::into_artifact).transpose()
    }

    fn insert_artifact(&self, artifact: &NewArtifact) -> StoreResult<Artifact> {
        let content_hash = artifact.content_hash();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO artifacts (customer_id, kind, subject, content_hash, raw_content, fetched_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                artifact.customer_id,
                artifact.kind.as_str(),
                artifact.subject,
                content_hash.as_str(),
                artifact.raw_content,
                artifact.fetched_at,
            ],
        )?;
        Ok(Artifact {
            id: conn.last_insert_rowid(),
            customer_id: artifact.customer_id.clone(),
            kind: artifact.kind,
            subject: artifact.subject.clone(),
            content_hash,
            raw_content: artifact.raw_content.clone(),
            fetched_at: artifact.fetched_at,
        })
    }

    fn artifact_count(&self, customer_id: &str, kind: ArtifactKind, subject: &str) -> StoreResult<usize> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM artifacts WHERE customer_id = ?1 AND kind = ?2 AND subject = ?3",
            params![customer_id, kind.as_str(), subject],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn insert_finding(
        &self,
        finding: &NewFinding,
        dedupe_key: &str,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Option<Finding>> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO findings \
             (customer_id, run_id, run_type, severity, category, title, details, url, dedupe_key, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT (dedupe_key) DO NOTHING",
            params![
                finding.customer_id,
                finding.run_id,
                finding.run_type.as_str(),
                finding.severity.as_str(),
                finding.category.as_str(),
                finding.title,
                finding.details,
                finding.url,
                dedupe_key,
                created_at,
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }

        Ok(Some(Finding {
            id: conn.last_insert_rowid(),
            customer_id: finding.customer_id.clone(),
            run_id: finding.run_id.clone(),
            run_type: finding.run_type,
            severity: finding.severity,
            category: finding.category,
            title: finding.title.clone(),
            details: finding.details.clone(),
            url: finding.url.clone(),
            dedupe_key: dedupe_key.to_string(),
            created_at,
        }))
    }

    fn list_findings(&self, customer_id: Option<&str>, limit: usize) -> StoreResult<Vec<Finding>> {
        let limit = to_i64(limit as u64);
        let rows = {
            let conn = self.conn.lock();
            match customer_id {
                Some(customer_id) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM findings WHERE customer_id = ?1 \
                         ORDER BY created_at DESC, id DESC LIMIT ?2",
                        FINDING_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(params![customer_id, limit], FindingRow::read)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM findings ORDER BY created_at DESC, id DESC LIMIT ?1",
                        FINDING_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(params![limit], FindingRow::read)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            }
        };
        collect_findings(rows)
    }

    fn findings_for_run(&self, run_id: &str) -> StoreResult<Vec<Finding>> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM findings WHERE run_id = ?1 ORDER BY id",
                FINDING_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![run_id], FindingRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        collect_findings(rows)
    }

    fn upsert_coverage(&self, coverage: &RunCoverage) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO run_coverage \
             (customer_id, run_id, run_type, total_urls, sampled_urls, success_count, error_count, \
              http_429_count, http_404_count, broken_link_count, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT (customer_id, run_id, run_type) DO UPDATE SET \
               total_urls = excluded.total_urls, \
               sampled_urls = excluded.sampled_urls, \
               success_count = excluded.success_count, \
               error_count = excluded.error_count, \
               http_429_count = excluded.http_429_count, \
               http_404_count = excluded.http_404_count, \
               broken_link_count = excluded.broken_link_count, \
               updated_at = excluded.updated_at",
            params![
                coverage.customer_id,
                coverage.run_id,
                coverage.run_type.as_str(),
                to_i64(coverage.total_urls),
                to_i64(coverage.sampled_urls),
                to_i64(coverage.success_count),
                to_i64(coverage.error_count),
                to_i64(coverage.http_429_count),
                to_i64(coverage.http_404_count),
                to_i64(coverage.broken_link_count),
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    fn get_coverage(
        &self,
        customer_id: &str,
        run_id: &str,
        run_type: RunType,
    ) -> StoreResult<Option<RunCoverage>> {
        let conn = self.conn.lock();
        let coverage = conn
            .query_row(
                "SELECT total_urls, sampled_urls, success_count, error_count, http_429_count, \
                 http_404_count, broken_link_count FROM run_coverage \
                 WHERE customer_id = ?1 AND run_id = ?2 AND run_type = ?3",
                params![customer_id, run_id, run_type.as_str()],
                |row| {
                    let mut coverage = RunCoverage::new(customer_id, run_id, run_type);
                    coverage.total_urls = to_u64(row.get(0)?);
                    coverage.sampled_urls = to_u64(row.get(1)?);
                    coverage.success_count = to_u64(row.get(2)?);
                    coverage.error_count = to_u64(row.get(3)?);
                    coverage.http_429_count = to_u64(row.get(4)?);
                    coverage.http_404_count = to_u64(row.get(5)?);
                    coverage.broken_link_count = to_u64(row.get(6)?);
                    Ok(coverage)
                },
            )
            .optional()?;
        Ok(coverage)
    }

    fn record_delivery(
        &self,
        customer_id: &str,
        run_id: &str,
        run_type: RunType,
        finding_count: usize,
    ) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO deliveries (customer_id, run_id, run_type, finding_count, delivered_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                customer_id,
                run_id,
                run_type.as_str(),
                to_i64(finding_count as u64),
                Utc::now(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FindingCategory, Severity};
    use chrono::Duration as ChronoDuration;

    fn store_with_customer() -> (SqliteStore, Customer) {
        let store = SqliteStore::open_in_memory().unwrap();
        let customer = store
            .create_customer(&NewCustomer {
                name: "Acme".to_string(),
                email: "ops@acme.test".to_string(),
                base_url: "https://acme.test/".to_string(),
                ..Default::default()
            })
            .unwrap();
        (store, customer)
    }

    fn finding(customer_id: &str, run_id: &str) -> NewFinding {
        NewFinding {
            customer_id: customer_id.to_string(),
            run_id: run_id.to_string(),
            run_type: RunType::Daily,
            severity: Severity::Critical,
            category: FindingCategory::Robots,
            title: "Site blocked by robots.txt".to_string(),
            details: "Added:\n  Disallow: /".to_string(),
            url: "https://acme.test/robots.txt".to_string(),
            period: "2024-01-15".to_string(),
        }
    }

    #[test]
    fn test_customers_and_targets() {
        let (store, customer) = store_with_customer();
        let loaded = store.get_customer(&customer.id).unwrap().unwrap();
        assert_eq!(loaded.base_url, "https://acme.test/");
        assert!(loaded.active);
        assert!(store.get_customer("missing").unwrap().is_none());

        let first = store.add_target(&customer.id, "https://acme.test/pricing", Some("Pricing")).unwrap();
        let again = store.add_target(&customer.id, "https://acme.test/pricing", None).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(store.list_targets(&customer.id).unwrap().len(), 1);

        assert!(matches!(
            store.add_target("missing", "https://x.test/", None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_only_active_customers_are_eligible() {
        let (store, customer) = store_with_customer();
        assert_eq!(store.list_customers(true).unwrap().len(), 1);
        store.set_customer_active(&customer.id, false).unwrap();
        assert!(store.list_customers(true).unwrap().is_empty());
        assert_eq!(store.list_customers(false).unwrap().len(), 1);
        assert!(store.set_customer_active("missing", true).is_err());
    }

    #[test]
    fn test_latest_artifact() {
        let (store, customer) = store_with_customer();
        let subject = "https://acme.test/robots.txt";
        assert!(store
            .latest_artifact(&customer.id, ArtifactKind::RobotsTxt, subject)
            .unwrap()
            .is_none());

        let now = Utc::now();
        for (offset, content) in [(2, "old"), (1, "middle"), (0, "new")] {
            store
                .insert_artifact(&NewArtifact {
                    customer_id: customer.id.clone(),
                    kind: ArtifactKind::RobotsTxt,
                    subject: subject.to_string(),
                    raw_content: content.to_string(),
                    fetched_at: now - ChronoDuration::minutes(offset),
                })
                .unwrap();
        }

        let latest = store
            .latest_artifact(&customer.id, ArtifactKind::RobotsTxt, subject)
            .unwrap()
            .unwrap();
        assert_eq!(latest.raw_content, "new");
        assert_eq!(latest.content_hash, ContentHash::compute("new"));
        assert_eq!(store.artifact_count(&customer.id, ArtifactKind::RobotsTxt, subject).unwrap(), 3);
        assert!(store
            .latest_artifact(&customer.id, ArtifactKind::Sitemap, subject)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_duplicate_dedupe_key_is_rejected() {
        let (store, customer) = store_with_customer();
        let first = store
            .insert_finding(&finding(&customer.id, "run-1"), "key-1", Utc::now())
            .unwrap();
        assert!(first.is_some());

        let mut later = finding(&customer.id, "run-2");
        later.details = "different details".to_string();
        let second = store.insert_finding(&later, "key-1", Utc::now()).unwrap();
        assert!(second.is_none());

        let stored = store.list_findings(Some(&customer.id), 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].run_id, "run-1");
        assert_eq!(stored[0].details, "Added:\n  Disallow: /");
        assert_eq!(store.findings_for_run("run-2").unwrap().len(), 0);
    }

    #[test]
    fn test_unknown_severity_surfaces_as_invalid_data() {
        let (store, customer) = store_with_customer();
        store
            .insert_finding(&finding(&customer.id, "run-1"), "key-1", Utc::now())
            .unwrap();
        store
            .conn
            .lock()
            .execute("UPDATE findings SET severity = 'urgent'", [])
            .unwrap();

        assert!(matches!(
            store.list_findings(None, 10),
            Err(StoreError::InvalidData(_))
        ));
    }

    #[test]
    fn test_coverage_upsert() {
        let (store, customer) = store_with_customer();
        let mut coverage = RunCoverage::new(&customer.id, "run-1", RunType::Weekly);
        coverage.total_urls = 10;
        store.upsert_coverage(&coverage).unwrap();

        coverage.sampled_urls = 8;
        coverage.http_404_count = 2;
        store.upsert_coverage(&coverage).unwrap();

        let stored = store
            .get_coverage(&customer.id, "run-1", RunType::Weekly)
            .unwrap()
            .unwrap();
        assert_eq!(stored, coverage);
        assert!(store
            .get_coverage(&customer.id, "run-1", RunType::Daily)
            .unwrap()
            .is_none());

        let rows: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM run_coverage", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_open_creates_file_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sitewatch.db");
        let customer_id = {
            let store = SqliteStore::open(&path).unwrap();
            store
                .create_customer(&NewCustomer {
                    name: "Acme".to_string(),
                    base_url: "https://acme.test/".to_string(),
                    ..Default::default()
                })
                .unwrap()
                .id
        };

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.get_customer(&customer_id).unwrap().is_some());
    }
}
