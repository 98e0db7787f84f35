//! Persistent store
//!
//! Customers, key-page targets, snapshots, artifacts, findings and run
//! coverage. Every record is scoped to a customer ID; nothing here needs
//! cross-customer transactions.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    Artifact, ArtifactKind, Customer, Finding, NewArtifact, NewCustomer, NewFinding, RunCoverage,
    RunType, Snapshot, Target,
};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage operations the monitoring pipeline relies on
pub trait Store: Send + Sync {
    // Customers

    fn create_customer(&self, customer: &NewCustomer) -> StoreResult<Customer>;

    fn get_customer(&self, customer_id: &str) -> StoreResult<Option<Customer>>;

    /// All customers, or only those eligible for runs
    fn list_customers(&self, active_only: bool) -> StoreResult<Vec<Customer>>;

    fn set_customer_active(&self, customer_id: &str, active: bool) -> StoreResult<()>;

    // Key pages

    /// Add a key page; adding an existing URL returns the existing target
    fn add_target(&self, customer_id: &str, url: &str, label: Option<&str>) -> StoreResult<Target>;

    fn list_targets(&self, customer_id: &str) -> StoreResult<Vec<Target>>;

    fn record_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()>;

    // Artifacts

    /// Most recent artifact for `(customer, kind, subject)`, if any
    fn latest_artifact(
        &self,
        customer_id: &str,
        kind: ArtifactKind,
        subject: &str,
    ) -> StoreResult<Option<Artifact>>;

    /// Append an artifact; artifacts are never updated
    fn insert_artifact(&self, artifact: &NewArtifact) -> StoreResult<Artifact>;

    fn artifact_count(&self, customer_id: &str, kind: ArtifactKind, subject: &str) -> StoreResult<usize>;

    // Findings

    /// Insert a finding unless `dedupe_key` already exists; `None` on collision
    fn insert_finding(
        &self,
        finding: &NewFinding,
        dedupe_key: &str,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Option<Finding>>;

    /// Newest first
    fn list_findings(&self, customer_id: Option<&str>, limit: usize) -> StoreResult<Vec<Finding>>;

    fn findings_for_run(&self, run_id: &str) -> StoreResult<Vec<Finding>>;

    // Coverage and deliveries

    /// Insert or replace the coverage row for `(customer, run, run type)`
    fn upsert_coverage(&self, coverage: &RunCoverage) -> StoreResult<()>;

    fn get_coverage(
        &self,
        customer_id: &str,
        run_id: &str,
        run_type: RunType,
    ) -> StoreResult<Option<RunCoverage>>;

    /// Note that findings for a run were handed to the alert sink
    fn record_delivery(
        &self,
        customer_id: &str,
        run_id: &str,
        run_type: RunType,
        finding_count: usize,
    ) -> StoreResult<()>;
}
