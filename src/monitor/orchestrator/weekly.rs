//! Weekly run: sitemap-driven crawl sample, new 404s and broken internal links

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::types::{CustomerReport, RunContext};
use super::{site_root, sitemap_location, CustomerPlan, RunOrchestrator};
use crate::monitor::crawl::CrawlReport;
use crate::monitor::diff::Classification;
use crate::monitor::extractor::extract_links;
use crate::monitor::scheduler::FetchScheduler;
use crate::monitor::sitemap::{self, SitemapKind};
use crate::monitor::{normalize_url, url_authority};
use crate::types::{Customer, FindingCategory, RunCoverage, Severity};

impl RunOrchestrator {
    pub(super) async fn plan_weekly(&self, _run: &RunContext, customer: &Customer) -> Result<CustomerPlan> {
        let base = site_root(customer)?;
        let robots = self.load_robots(&base).await?;
        let mut plan = CustomerPlan::new(customer, robots.gate.clone());

        let sitemap_url = sitemap_location(customer, &robots.gate, &base)?;
        let sitemap_urls = self.expand_sitemap(&customer.id, &sitemap_url).await;

        // Key pages first so they always make the sample
        let mut seen = HashSet::new();
        let candidates: Vec<String> = self
            .key_pages(customer, &base)?
            .into_iter()
            .chain(sitemap_urls.iter().map(|u| normalize_url(&base, u)))
            .filter(|u| !u.is_empty() && seen.insert(u.clone()))
            .collect();
        plan.total_urls = candidates.len();

        let limit = customer.crawl_limit.unwrap_or(self.settings.weekly.crawl_limit);
        plan.urls = robots
            .gate
            .filter_urls(&candidates)
            .into_iter()
            .take(limit)
            .collect();

        info!(
            customer_id = %customer.id,
            discovered = plan.total_urls,
            sampled = plan.urls.len(),
            limit,
            "weekly crawl planned"
        );
        Ok(plan)
    }

    /// Page URLs of a sitemap, following one level of sitemap index
    async fn expand_sitemap(&self, customer_id: &str, sitemap_url: &str) -> Vec<String> {
        let response = self.fetcher.fetch(sitemap_url).await;
        if !response.is_success() {
            warn!(customer_id, url = sitemap_url, status = ?response.status_code, "sitemap unavailable");
            return Vec::new();
        }

        let document = sitemap::parse(&response.body);
        match document.kind {
            SitemapKind::UrlSet => document.locations,
            SitemapKind::Index => {
                let max_children = self.settings.weekly.max_child_sitemaps;
                if document.locations.len() > max_children {
                    debug!(
                        customer_id,
                        children = document.locations.len(),
                        max_children,
                        "sitemap index truncated"
                    );
                }

                let mut urls = Vec::new();
                for child in document.locations.iter().take(max_children) {
                    let response = self.fetcher.fetch(child).await;
                    if !response.is_success() {
                        warn!(customer_id, url = %child, status = ?response.status_code, "child sitemap unavailable");
                        continue;
                    }
                    let child_doc = sitemap::parse(&response.body);
                    if child_doc.kind == SitemapKind::UrlSet {
                        urls.extend(child_doc.locations);
                    } else {
                        warn!(customer_id, url = %child, kind = %child_doc.kind, "child sitemap skipped");
                    }
                }
                urls
            }
            kind => {
                warn!(
                    customer_id,
                    url = sitemap_url,
                    kind = %kind,
                    reason = document.reason.as_deref().unwrap_or("none"),
                    "sitemap unreadable"
                );
                Vec::new()
            }
        }
    }

    /// Collect same-site links from crawled pages and check the ones not
    /// already crawled
    pub(super) async fn check_links(
        &self,
        scheduler: &Mutex<FetchScheduler>,
        plans: &mut [CustomerPlan],
        report: &CrawlReport,
    ) -> CrawlReport {
        let max_checks = self.settings.weekly.max_link_checks;

        for plan in plans.iter_mut() {
            let Some(authority) = url_authority(&plan.customer.base_url) else {
                continue;
            };
            let crawled: HashSet<&str> = plan.urls.iter().map(String::as_str).collect();
            let mut scheduled = HashSet::new();

            for record in report.records_for(&plan.customer.id) {
                let Some(response) = record.response() else {
                    continue;
                };
                if !record.is_success() || !response.is_html() {
                    continue;
                }
                let page = if response.final_url.is_empty() {
                    record.url.as_str()
                } else {
                    response.final_url.as_str()
                };

                for link in extract_links(&response.body, page) {
                    if url_authority(&link).as_deref() != Some(authority.as_str()) || !plan.gate.can_fetch(&link) {
                        continue;
                    }
                    let sources = plan.link_sources.entry(link.clone()).or_default();
                    if !sources.contains(&record.url) {
                        sources.push(record.url.clone());
                    }
                    if !crawled.contains(link.as_str())
                        && scheduled.len() < max_checks
                        && scheduled.insert(link.clone())
                    {
                        plan.link_checks.push(link);
                    }
                }
            }

            debug!(
                customer_id = %plan.customer.id,
                links = plan.link_sources.len(),
                checks = plan.link_checks.len(),
                "internal links collected"
            );
        }

        self.crawl(scheduler, plans.iter().map(|p| (p.customer.id.as_str(), p.link_checks.as_slice())))
            .await
    }

    pub(super) fn evaluate_weekly(
        &self,
        run: &RunContext,
        plan: CustomerPlan,
        report: &CrawlReport,
        links: &CrawlReport,
    ) -> Result<CustomerReport> {
        let customer = plan.customer;
        let mut findings = plan.findings;
        let mut coverage = RunCoverage::new(&customer.id, &run.run_id, run.run_type);
        coverage.total_urls = plan.total_urls as u64;
        coverage.sampled_urls = plan.urls.len() as u64;
        coverage.http_429_count = report.rate_limited_for(&customer.id) + links.rate_limited_for(&customer.id);

        let mut statuses: HashMap<&str, u16> = HashMap::new();
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
            if let Some(status) = response.status_code {
                statuses.insert(record.url.as_str(), status);
            }
            self.diff_status(run, &customer.id, &record.url, response, &mut findings)?;
        }
        for record in links.records_for(&customer.id) {
            if let Some(status) = record.response().and_then(|r| r.status_code) {
                statuses.insert(record.url.as_str(), status);
            }
        }

        for (link, sources) in &plan.link_sources {
            let Some(&status) = statuses.get(link.as_str()) else {
                continue;
            };
            if !matches!(status, 404 | 410) {
                continue;
            }
            coverage.broken_link_count += 1;

            let mut details = format!("HTTP status: {}\nLinked from:", status);
            for source in sources {
                details.push_str("\n  ");
                details.push_str(source);
            }
            let classification = Classification::new(Severity::Warning, "Broken internal link", details);
            self.record(run, &customer.id, FindingCategory::BrokenLinks, classification, link, &mut findings)?;
        }

        info!(
            customer_id = %customer.id,
            sampled = coverage.sampled_urls,
            errors = coverage.error_count,
            not_found = coverage.http_404_count,
            broken_links = coverage.broken_link_count,
            "weekly coverage"
        );
        Ok(CustomerReport { coverage, findings })
    }
}
