//! Run orchestration
//!
//! A run moves through `init -> per-customer loop -> summarize -> done`. The
//! per-customer loop has three phases: planning (robots.txt, sitemaps, key
//! pages), one fair crawl shared by every customer, and evaluation against
//! baselines. Planning and evaluation are isolated per customer: an error
//! becomes a critical `system` finding for that customer and the run moves on.

mod daily;
mod types;
mod weekly;

pub use types::{CustomerOutcome, CustomerResult, RunSettings, RunSummary};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use url::Url;

use self::types::RunContext;
use super::crawl::{run_crawl, CrawlReport};
use super::dedup::{FindingDeduplicator, InsertOutcome};
use super::diff::{classify_status, BaselineEngine, Classification, Observation};
use super::fetcher::{FetchConfig, FetchEngine, FetchResponse, PageFetcher};
use super::psi::PsiClient;
use super::robots::RobotsGate;
use super::scheduler::FetchScheduler;
use super::normalize_url;
use crate::config::Config;
use crate::notify::{Alert, AlertSink};
use crate::store::Store;
use crate::types::{
    ArtifactKind, Customer, Finding, FindingCategory, NewFinding, RunType, Severity, SeverityCounts,
};

/// Per-customer state carried from planning to evaluation
struct CustomerPlan {
    customer: Customer,
    gate: RobotsGate,
    /// URLs handed to the scheduler
    urls: Vec<String>,
    /// URLs discovered before robots filtering and sampling
    total_urls: usize,
    /// Findings persisted during planning
    findings: Vec<Finding>,
    /// Internal link -> pages linking to it (weekly only)
    link_sources: BTreeMap<String, Vec<String>>,
    /// Links scheduled for a status check (weekly only)
    link_checks: Vec<String>,
}

impl CustomerPlan {
    fn new(customer: &Customer, gate: RobotsGate) -> Self {
        Self {
            customer: customer.clone(),
            gate,
            urls: Vec::new(),
            total_urls: 0,
            findings: Vec::new(),
            link_sources: BTreeMap::new(),
            link_checks: Vec::new(),
        }
    }
}

/// robots.txt as fetched during planning
struct RobotsFetch {
    url: String,
    gate: RobotsGate,
    /// Body to diff; empty for a 4xx, `None` when the fetch failed
    content: Option<String>,
}

/// Runs daily and weekly monitoring over every eligible customer
pub struct RunOrchestrator {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn AlertSink>,
    psi: Option<PsiClient>,
    settings: RunSettings,
    baselines: BaselineEngine,
    dedup: FindingDeduplicator,
    stop: Arc<AtomicBool>,
}

impl RunOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn AlertSink>,
        settings: RunSettings,
    ) -> Self {
        Self {
            baselines: BaselineEngine::new(Arc::clone(&store)),
            dedup: FindingDeduplicator::new(Arc::clone(&store)),
            store,
            fetcher,
            sink,
            psi: None,
            settings,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build with a real HTTP fetcher (and PageSpeed client when enabled)
    pub fn from_config(config: &Config, store: Arc<dyn Store>, sink: Arc<dyn AlertSink>) -> Result<Self> {
        let fetcher = FetchEngine::new(FetchConfig::from_settings(&config.fetch))
            .context("Failed to create fetch engine")?;
        let mut orchestrator = Self::new(store, Arc::new(fetcher), sink, RunSettings::from_config(config));
        if config.psi.enabled {
            let psi = PsiClient::new(config.psi.clone(), &config.fetch.user_agent)
                .context("Failed to create PageSpeed client")?;
            orchestrator = orchestrator.with_psi(psi);
        }
        Ok(orchestrator)
    }

    pub fn with_psi(mut self, psi: PsiClient) -> Self {
        self.psi = Some(psi);
        self
    }

    /// Ask the run to stop; customers not yet processed are skipped
    pub fn stop(&self) {
        info!("stop requested");
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Shared flag behind [`stop`](Self::stop), e.g. for a signal handler
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Execute one run over every eligible customer
    pub async fn run(&self, run_type: RunType) -> Result<RunSummary> {
        let started = Instant::now();
        let run = RunContext::new(run_type);

        // A store that cannot enumerate customers aborts the whole run
        let customers = self
            .store
            .list_customers(true)
            .context("Failed to list eligible customers")?;
        info!(
            run_id = %run.run_id,
            run_type = %run_type,
            period = %run.period,
            customers = customers.len(),
            "run started"
        );

        let mut results = Vec::with_capacity(customers.len());
        let mut coverage = Vec::new();

        // Planning
        let mut plans = Vec::new();
        for customer in &customers {
            if self.is_stopping() {
                results.push(skipped(customer));
                continue;
            }
            let planned = match run_type {
                RunType::Daily => self.plan_daily(&run, customer).await,
                RunType::Weekly => self.plan_weekly(&run, customer).await,
            };
            match planned {
                Ok(plan) => plans.push(plan),
                Err(e) => results.push(self.fail(&run, customer, e)),
            }
        }

        // One fair crawl across every planned customer; domain cooldowns and
        // 429 ceilings carry into the link round
        let scheduler = Mutex::new(FetchScheduler::new(self.settings.scheduler.clone()));
        let report = self
            .crawl(&scheduler, plans.iter().map(|p| (p.customer.id.as_str(), p.urls.as_slice())))
            .await;

        let links = if run_type == RunType::Weekly
            && self.settings.weekly.check_broken_links
            && !self.is_stopping()
        {
            self.check_links(&scheduler, &mut plans, &report).await
        } else {
            CrawlReport::default()
        };

        // Evaluation
        for plan in plans {
            let customer = plan.customer.clone();
            if self.is_stopping() {
                results.push(skipped(&customer));
                continue;
            }
            let evaluated = match run_type {
                RunType::Daily => self.evaluate_daily(&run, plan, &report).await,
                RunType::Weekly => self.evaluate_weekly(&run, plan, &report, &links),
            };
            let evaluated = evaluated.and_then(|customer_report| {
                self.store
                    .upsert_coverage(&customer_report.coverage)
                    .context("Failed to store run coverage")?;
                Ok(customer_report)
            });

            match evaluated {
                Ok(customer_report) => {
                    self.deliver(&run, &customer, &customer_report.findings).await;
                    let counts = SeverityCounts::from_findings(&customer_report.findings);
                    info!(
                        customer_id = %customer.id,
                        run_id = %run.run_id,
                        findings = customer_report.findings.len(),
                        "customer processed"
                    );
                    results.push(CustomerResult {
                        customer_id: customer.id.clone(),
                        name: customer.name.clone(),
                        outcome: CustomerOutcome::Succeeded {
                            findings: customer_report.findings.len(),
                        },
                        counts,
                    });
                    coverage.push(customer_report.coverage);
                }
                Err(e) => results.push(self.fail(&run, &customer, e)),
            }
        }

        // Summarize
        let (mut succeeded, mut failed, mut skipped_count) = (0, 0, 0);
        for result in &results {
            match result.outcome {
                CustomerOutcome::Succeeded { .. } => succeeded += 1,
                CustomerOutcome::Failed { .. } => failed += 1,
                CustomerOutcome::Skipped => skipped_count += 1,
            }
        }
        let summary = RunSummary {
            run_id: run.run_id.clone(),
            run_type,
            started_at: run.started_at,
            total: results.len(),
            succeeded,
            failed,
            skipped: skipped_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
            customers: results,
            coverage,
        };

        info!(
            run_id = %summary.run_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            elapsed_ms = summary.elapsed_ms,
            "run finished"
        );
        Ok(summary)
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    async fn crawl<'a>(
        &self,
        scheduler: &Mutex<FetchScheduler>,
        batches: impl IntoIterator<Item = (&'a str, &'a [String])>,
    ) -> CrawlReport {
        {
            let mut scheduler = scheduler.lock();
            for (customer_id, urls) in batches {
                scheduler.add_tasks(customer_id, urls.iter().cloned());
            }
        }
        run_crawl(scheduler, Arc::clone(&self.fetcher), &self.settings.crawl, &self.stop).await
    }

    /// Fetch robots.txt and build the gate; 4xx means no restrictions
    async fn load_robots(&self, base: &str) -> Result<RobotsFetch> {
        let url = site_url(base, "/robots.txt")?;
        let mut gate = RobotsGate::new(base, &self.settings.user_agent);
        let response = self.fetcher.fetch(&url).await;

        let content = match response.status_code {
            Some(200..=299) if response.error_kind.is_none() => Some(response.body),
            Some(status @ 400..=499) if status != 429 => Some(String::new()),
            _ => {
                warn!(
                    url = %url,
                    status = ?response.status_code,
                    error = response.error.as_deref().unwrap_or("none"),
                    "robots.txt unavailable, crawling unrestricted"
                );
                None
            }
        };
        if let Some(content) = &content {
            gate.load(content);
        }

        Ok(RobotsFetch { url, gate, content })
    }

    /// Configured key pages, or the site root when there are none
    fn key_pages(&self, customer: &Customer, base: &str) -> Result<Vec<String>> {
        let targets = self
            .store
            .list_targets(&customer.id)
            .context("Failed to load key pages")?;
        let mut seen = HashSet::new();
        let pages: Vec<String> = targets
            .iter()
            .map(|t| normalize_url(base, &t.url))
            .filter(|u| !u.is_empty() && seen.insert(u.clone()))
            .collect();
        Ok(if pages.is_empty() {
            vec![base.to_string()]
        } else {
            pages
        })
    }

    /// Persist a classified finding, keeping it only if it was new
    fn record(
        &self,
        run: &RunContext,
        customer_id: &str,
        category: FindingCategory,
        classification: Classification,
        url: &str,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let finding = run.finding(customer_id, category, classification, url);
        if let InsertOutcome::Inserted(inserted) = self
            .dedup
            .insert_finding(&finding)
            .context("Failed to store finding")?
        {
            findings.push(inserted);
        }
        Ok(())
    }

    /// Compare a page's HTTP status with its baseline
    fn diff_status(
        &self,
        run: &RunContext,
        customer_id: &str,
        url: &str,
        response: &FetchResponse,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let Some(status) = response.status_code else {
            return Ok(());
        };
        if response.is_rate_limited() {
            return Ok(());
        }

        let observation = self.baselines.observe(
            customer_id,
            ArtifactKind::HttpStatus,
            url,
            &status.to_string(),
            Utc::now(),
        )?;
        if let Observation::Changed { previous, .. } = observation {
            if let Some(classification) = classify_status(previous.raw_content.parse().ok(), Some(status)) {
                self.record(run, customer_id, FindingCategory::Availability, classification, url, findings)?;
            }
        }
        Ok(())
    }

    /// Hand findings to the alert sink: critical only for daily runs, a
    /// digest of everything for weekly runs
    async fn deliver(&self, run: &RunContext, customer: &Customer, findings: &[Finding]) {
        let selected: Vec<Finding> = findings
            .iter()
            .filter(|f| run.run_type == RunType::Weekly || f.severity == Severity::Critical)
            .cloned()
            .collect();
        if selected.is_empty() {
            return;
        }

        let alert = Alert::new(customer.clone(), &run.run_id, run.run_type, selected);
        match self.sink.deliver(&alert).await {
            Ok(()) => {
                if let Err(e) = self.store.record_delivery(
                    &customer.id,
                    &run.run_id,
                    run.run_type,
                    alert.findings.len(),
                ) {
                    warn!(customer_id = %customer.id, error = %e, "failed to record delivery");
                }
            }
            Err(e) => warn!(customer_id = %customer.id, error = %e, "alert delivery failed"),
        }
    }

    /// Record a customer failure as a critical system finding
    fn fail(&self, run: &RunContext, customer: &Customer, err: anyhow::Error) -> CustomerResult {
        let message = format!("{:#}", err);
        error!(
            customer_id = %customer.id,
            run_id = %run.run_id,
            error = %message,
            "customer processing failed"
        );

        let finding = NewFinding {
            customer_id: customer.id.clone(),
            run_id: run.run_id.clone(),
            run_type: run.run_type,
            severity: Severity::Critical,
            category: FindingCategory::System,
            title: "Monitoring run failed".to_string(),
            details: message.clone(),
            url: customer.base_url.clone(),
            period: run.period.to_string(),
        };
        let mut counts = SeverityCounts::default();
        match self.dedup.insert_finding(&finding) {
            Ok(InsertOutcome::Inserted(_)) => counts.add(Severity::Critical),
            Ok(InsertOutcome::Deduped { .. }) => {}
            Err(e) => error!(customer_id = %customer.id, error = %e, "failed to record system finding"),
        }

        CustomerResult {
            customer_id: customer.id.clone(),
            name: customer.name.clone(),
            outcome: CustomerOutcome::Failed { error: message },
            counts,
        }
    }
}

fn skipped(customer: &Customer) -> CustomerResult {
    CustomerResult {
        customer_id: customer.id.clone(),
        name: customer.name.clone(),
        outcome: CustomerOutcome::Skipped,
        counts: SeverityCounts::default(),
    }
}

/// Normalized site root of a customer
fn site_root(customer: &Customer) -> Result<String> {
    let root = normalize_url("", &customer.base_url);
    if root.is_empty() {
        anyhow::bail!("Invalid base URL {:?}", customer.base_url);
    }
    Ok(root)
}

fn site_url(base: &str, path: &str) -> Result<String> {
    let base = Url::parse(base).with_context(|| format!("Invalid base URL {:?}", base))?;
    Ok(base.join(path)?.to_string())
}

/// Explicit sitemap, then the first robots.txt `Sitemap:`, then `/sitemap.xml`
fn sitemap_location(customer: &Customer, gate: &RobotsGate, base: &str) -> Result<String> {
    if let Some(configured) = customer.sitemap_url.as_deref().filter(|s| !s.trim().is_empty()) {
        return Ok(configured.trim().to_string());
    }
    if let Some(listed) = gate.sitemaps().first() {
        return Ok(listed.clone());
    }
    site_url(base, "/sitemap.xml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn customer(base_url: &str, sitemap_url: Option<&str>) -> Customer {
        Customer {
            id: "c1".to_string(),
            name: "Acme".to_string(),
            email: "ops@acme.test".to_string(),
            base_url: base_url.to_string(),
            sitemap_url: sitemap_url.map(str::to_string),
            crawl_limit: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sitemap_location_precedence() {
        let base = "https://acme.test/";
        let mut gate = RobotsGate::new(base, "SitewatchBot");
        assert_eq!(
            sitemap_location(&customer(base, None), &gate, base).unwrap(),
            "https://acme.test/sitemap.xml"
        );

        gate.load("Sitemap: https://cdn.acme.test/sm.xml\n");
        assert_eq!(
            sitemap_location(&customer(base, None), &gate, base).unwrap(),
            "https://cdn.acme.test/sm.xml"
        );
        assert_eq!(
            sitemap_location(&customer(base, Some("https://acme.test/custom.xml")), &gate, base).unwrap(),
            "https://acme.test/custom.xml"
        );
    }

    #[test]
    fn test_site_root_rejects_invalid_urls() {
        assert_eq!(site_root(&customer("HTTPS://Acme.test", None)).unwrap(), "https://acme.test/");
        assert!(site_root(&customer("acme dot test", None)).is_err());
        assert!(site_root(&customer("ftp://acme.test/", None)).is_err());
    }

    #[test]
    fn test_robots_url_is_at_site_root() {
        assert_eq!(
            site_url("https://acme.test/shop", "/robots.txt").unwrap(),
            "https://acme.test/robots.txt"
        );
    }
}
