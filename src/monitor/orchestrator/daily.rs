//! Daily run: robots.txt, sitemap size and key-page signals

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::{CustomerReport, RunContext};
use super::{site_root, sitemap_location, CustomerPlan, RunOrchestrator};
use crate::monitor::crawl::CrawlReport;
use crate::monitor::diff::{
    classify_field, classify_performance, classify_robots, classify_sitemap_count, Classification,
    Observation, TrackedField,
};
use crate::monitor::extractor::PageSignals;
use crate::monitor::fetcher::FetchResponse;
use crate::monitor::psi::PsiClient;
use crate::monitor::sitemap::{self, SitemapKind};
use crate::types::{
    ArtifactKind, Customer, Finding, FindingCategory, RunCoverage, Severity, Snapshot,
};

impl RunOrchestrator {
    pub(super) async fn plan_daily(&self, run: &RunContext, customer: &Customer) -> Result<CustomerPlan> {
        let base = site_root(customer)?;
        let robots = self.load_robots(&base).await?;
        let mut plan = CustomerPlan::new(customer, robots.gate.clone());

        if let Some(content) = &robots.content {
            self.diff_robots(run, customer, &robots.url, content, &mut plan.findings)?;
        }

        let sitemap_url = sitemap_location(customer, &robots.gate, &base)?;
        self.diff_sitemap_count(run, customer, &sitemap_url, &mut plan.findings)
            .await?;

        let key_pages = self.key_pages(customer, &base)?;
        plan.total_urls = key_pages.len();
        plan.urls = robots.gate.filter_urls(&key_pages);
        if plan.urls.len() < key_pages.len() {
            info!(
                customer_id = %customer.id,
                disallowed = key_pages.len() - plan.urls.len(),
                "key pages disallowed by robots.txt"
            );
        }
        Ok(plan)
    }

    fn diff_robots(
        &self,
        run: &RunContext,
        customer: &Customer,
        robots_url: &str,
        content: &str,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let observation = self
            .baselines
            .observe(&customer.id, ArtifactKind::RobotsTxt, robots_url, content, Utc::now())
            .context("Failed to store robots.txt baseline")?;

        if let Observation::Changed { previous, current } = observation {
            if let Some(classification) = classify_robots(&previous.raw_content, &current.raw_content) {
                self.record(run, &customer.id, FindingCategory::Robots, classification, robots_url, findings)?;
            }
        }
        Ok(())
    }

    async fn diff_sitemap_count(
        &self,
        run: &RunContext,
        customer: &Customer,
        sitemap_url: &str,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let response = self.fetcher.fetch(sitemap_url).await;
        let count = if response.is_success() {
            let counted = sitemap::extract_url_count(&response.body);
            if matches!(counted.kind, SitemapKind::ParseError | SitemapKind::Unknown) {
                warn!(customer_id = %customer.id, url = sitemap_url, kind = %counted.kind, "sitemap unreadable");
            }
            counted.count
        } else if response.is_not_found() {
            0
        } else {
            warn!(
                customer_id = %customer.id,
                url = sitemap_url,
                status = ?response.status_code,
                error = response.error.as_deref().unwrap_or("none"),
                "sitemap fetch failed, keeping previous baseline"
            );
            return Ok(());
        };

        let observation = self.baselines.observe(
            &customer.id,
            ArtifactKind::Sitemap,
            sitemap_url,
            &count.to_string(),
            Utc::now(),
        )?;
        if let Observation::Changed { previous, .. } = observation {
            let previous_count = previous.raw_content.parse().unwrap_or(0);
            if let Some(classification) =
                classify_sitemap_count(previous_count, count, &self.settings.thresholds)
            {
                self.record(run, &customer.id, FindingCategory::Sitemap, classification, sitemap_url, findings)?;
            }
        }
        Ok(())
    }

    pub(super) async fn evaluate_daily(
        &self,
        run: &RunContext,
        plan: CustomerPlan,
        report: &CrawlReport,
    ) -> Result<CustomerReport> {
        let customer = plan.customer;
        let mut findings = plan.findings;
        let mut coverage = RunCoverage::new(&customer.id, &run.run_id, run.run_type);
        coverage.total_urls = plan.total_urls as u64;
        coverage.sampled_urls = plan.urls.len() as u64;
        coverage.http_429_count = report.rate_limited_for(&customer.id);

        for record in report.records_for(&customer.id) {
            let Some(response) = record.response() else {
                coverage.error_count += 1;
                continue;
            };
            if record.is_success() {
                coverage.success_count += 1;
            } else {
                coverage.error_count += 1;
            }
            if response.is_not_found() {
                coverage.http_404_count += 1;
            }
            self.diff_page(run, &customer.id, &record.url, response, &mut findings)?;
        }

        if let Some(psi) = &self.psi {
            self.diff_performance(run, &customer, psi, &mut findings).await?;
        }

        Ok(CustomerReport { coverage, findings })
    }

    /// Status, title, canonical, meta robots and content of one key page
    fn diff_page(
        &self,
        run: &RunContext,
        customer_id: &str,
        url: &str,
        response: &FetchResponse,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let signals = (response.is_success() && response.is_html()).then(|| PageSignals::from_html(&response.body));

        self.store.record_snapshot(&Snapshot {
            customer_id: customer_id.to_string(),
            url: url.to_string(),
            status_code: response.status_code,
            final_url: response.final_url.clone(),
            content_hash: signals.as_ref().map(|s| s.content_hash.clone()),
            fetched_at: Utc::now(),
        })?;

        self.diff_status(run, customer_id, url, response, findings)?;

        let Some(signals) = signals else {
            return Ok(());
        };

        for (field, value) in [
            (TrackedField::Title, &signals.title),
            (TrackedField::Canonical, &signals.canonical),
            (TrackedField::MetaRobots, &signals.meta_robots),
        ] {
            let observation = self
                .baselines
                .observe(customer_id, field.artifact_kind(), url, value, Utc::now())?;
            if let Observation::Changed { previous, current } = observation {
                if let Some(classification) = classify_field(field, &previous.raw_content, &current.raw_content) {
                    self.record(run, customer_id, field.category(), classification, url, findings)?;
                }
            }
        }

        let observation = self
            .baselines
            .observe(customer_id, ArtifactKind::PageText, url, &signals.text, Utc::now())?;
        if let Observation::Changed { previous, current } = observation {
            debug!(customer_id, url, "page content changed");
            let classification = Classification::new(
                Severity::Info,
                "Page content changed",
                format!(
                    "Content hash: {} -> {}",
                    short_hash(previous.content_hash.as_str()),
                    short_hash(current.content_hash.as_str())
                ),
            );
            self.record(run, customer_id, FindingCategory::Content, classification, url, findings)?;
        }
        Ok(())
    }

    async fn diff_performance(
        &self,
        run: &RunContext,
        customer: &Customer,
        psi: &PsiClient,
        findings: &mut Vec<Finding>,
    ) -> Result<()> {
        let subject = site_root(customer)?;
        let score = match psi.performance_score(&subject).await {
            Ok(score) => score,
            Err(e) => {
                warn!(customer_id = %customer.id, error = %e, "performance check skipped");
                return Ok(());
            }
        };

        let observation = self.baselines.observe(
            &customer.id,
            ArtifactKind::Performance,
            &subject,
            &format!("{:.0}", score),
            Utc::now(),
        )?;
        if let Observation::Changed { previous, current } = observation {
            let before: f64 = previous.raw_content.parse().unwrap_or(score);
            let after: f64 = current.raw_content.parse().unwrap_or(score);
            if let Some(classification) = classify_performance(before, after, &self.settings.thresholds) {
                self.record(run, &customer.id, FindingCategory::Performance, classification, &subject, findings)?;
            }
        }
        Ok(())
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
