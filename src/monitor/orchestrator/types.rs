//! Run-level types

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{Config, WeeklyConfig};
use crate::monitor::crawl::CrawlOptions;
use crate::monitor::dedup::Period;
use crate::monitor::diff::{Classification, Thresholds};
use crate::monitor::scheduler::SchedulerConfig;
use crate::types::{CustomerId, FindingCategory, NewFinding, RunCoverage, RunId, RunType, SeverityCounts};

/// Orchestrator settings derived from [`Config`]
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub user_agent: String,
    pub scheduler: SchedulerConfig,
    pub crawl: CrawlOptions,
    pub thresholds: Thresholds,
    pub weekly: WeeklyConfig,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            user_agent: config.fetch.user_agent.clone(),
            scheduler: SchedulerConfig::from_settings(&config.scheduler),
            crawl: CrawlOptions::from_settings(&config.scheduler),
            thresholds: Thresholds::from_config(&config.thresholds),
            weekly: config.weekly.clone(),
        }
    }
}

/// Identity of the run in progress
#[derive(Debug, Clone)]
pub(crate) struct RunContext {
    pub run_id: RunId,
    pub run_type: RunType,
    pub period: Period,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(run_type: RunType) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            run_type,
            period: Period::for_run(run_type, started_at),
            started_at,
        }
    }

    pub fn finding(
        &self,
        customer_id: &str,
        category: FindingCategory,
        classification: Classification,
        url: &str,
    ) -> NewFinding {
        NewFinding {
            customer_id: customer_id.to_string(),
            run_id: self.run_id.clone(),
            run_type: self.run_type,
            severity: classification.severity,
            category,
            title: classification.title,
            details: classification.diff_text,
            url: url.to_string(),
            period: self.period.to_string(),
        }
    }
}

/// How one customer's part of a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CustomerOutcome {
    /// Processed; `findings` new findings were persisted
    Succeeded { findings: usize },
    /// Processing failed and a system finding was recorded
    Failed { error: String },
    /// Not processed because the run was stopped
    Skipped,
}

/// Per-customer entry of a [`RunSummary`]
#[derive(Debug, Clone, Serialize)]
pub struct CustomerResult {
    pub customer_id: CustomerId,
    pub name: String,
    pub outcome: CustomerOutcome,
    pub counts: SeverityCounts,
}

/// Operator-facing summary of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub run_type: RunType,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_ms: u64,
    pub customers: Vec<CustomerResult>,
    pub coverage: Vec<RunCoverage>,
}

impl RunSummary {
    pub fn outcome_of(&self, customer_id: &str) -> Option<&CustomerOutcome> {
        self.customers
            .iter()
            .find(|c| c.customer_id == customer_id)
            .map(|c| &c.outcome)
    }

    pub fn coverage_of(&self, customer_id: &str) -> Option<&RunCoverage> {
        self.coverage.iter().find(|c| c.customer_id == customer_id)
    }
}

/// What a successfully processed customer produced
#[derive(Debug, Clone)]
pub(crate) struct CustomerReport {
    pub coverage: RunCoverage,
    pub findings: Vec<crate::types::Finding>,
}
