//! End-to-end monitoring runs against a mock site
//!
//! Each test drives `RunOrchestrator` with the real HTTP fetch engine and an
//! in-memory store, swapping the mock site's responses between runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use sitewatch::{
    config::Config,
    monitor::{CustomerOutcome, RunOrchestrator},
    notify::{Alert, AlertSink},
    store::{SqliteStore, Store},
    types::{Customer, FindingCategory, NewCustomer, RunType, Severity},
};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Keeps every delivered alert
#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

struct Harness {
    server: MockServer,
    store: Arc<SqliteStore>,
    sink: Arc<RecordingSink>,
    orchestrator: RunOrchestrator,
}

impl Harness {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink::default());

        let mut config = Config::default();
        config.fetch.max_attempts = 1;
        config.scheduler.max_concurrency = 4;
        let orchestrator = RunOrchestrator::from_config(&config, store.clone(), sink.clone()).unwrap();

        Self {
            server,
            store,
            sink,
            orchestrator,
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.server.uri(), route)
    }

    fn add_customer(&self, name: &str, crawl_limit: Option<usize>) -> Customer {
        self.store
            .create_customer(&NewCustomer {
                name: name.to_string(),
                email: format!("{}@example.test", name.to_lowercase()),
                base_url: self.url("/"),
                crawl_limit,
                ..NewCustomer::default()
            })
            .unwrap()
    }

    async fn serve(&self, route: &str, status: u16, content_type: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_raw(body, content_type))
            .mount(&self.server)
            .await;
    }

    async fn serve_html(&self, route: &str, status: u16, title: &str, body: &str) {
        let html = format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            title, body
        );
        self.serve(route, status, "text/html; charset=utf-8", html).await;
    }

    async fn serve_text(&self, route: &str, body: &str) {
        self.serve(route, 200, "text/plain", body.to_string()).await;
    }

    async fn serve_urlset(&self, route: &str, pages: &[&str]) {
        let entries: String = pages
            .iter()
            .map(|p| format!("<url><loc>{}</loc></url>", self.url(p)))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{}</urlset>"#,
            entries
        );
        self.serve(route, 200, "application/xml", xml).await;
    }

    async fn reset(&self) {
        self.server.reset().await;
    }
}

fn titles(findings: &[sitewatch::types::Finding]) -> Vec<&str> {
    findings.iter().map(|f| f.title.as_str()).collect()
}

#[tokio::test]
async fn test_daily_robots_full_block_is_critical() {
    let h = Harness::new().await;
    let customer = h.add_customer("Acme", None);

    h.serve_text("/robots.txt", "User-agent: *\nDisallow: /private\n").await;
    h.serve_html("/", 200, "Home", "<p>Welcome</p>").await;
    let first = h.orchestrator.run(RunType::Daily).await.unwrap();
    assert_eq!(first.outcome_of(&customer.id), Some(&CustomerOutcome::Succeeded { findings: 0 }));

    h.reset().await;
    h.serve_text("/robots.txt", "User-agent: *\nDisallow: /\n").await;
    h.serve_html("/", 200, "Home", "<p>Welcome</p>").await;
    let second = h.orchestrator.run(RunType::Daily).await.unwrap();

    let findings = h.store.findings_for_run(&second.run_id).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].category, FindingCategory::Robots);
    assert_eq!(findings[0].severity, Severity::Critical);
    assert_eq!(findings[0].title, "robots.txt blocks the entire site");
    assert_eq!(findings[0].url, h.url("/robots.txt"));

    // The site root is now disallowed and must not be fetched
    let coverage = second.coverage_of(&customer.id).unwrap();
    assert_eq!(coverage.total_urls, 1);
    assert_eq!(coverage.sampled_urls, 0);

    let alerts = h.sink.alerts.lock();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].counts.critical, 1);
}

#[tokio::test]
async fn test_daily_sitemap_drop_title_change_and_new_404() {
    let h = Harness::new().await;
    let customer = h.add_customer("Acme", None);
    h.store.add_target(&customer.id, &h.url("/pricing"), Some("Pricing")).unwrap();
    h.store.add_target(&customer.id, &h.url("/docs"), None).unwrap();

    let ten: Vec<String> = (0..10).map(|i| format!("/page-{}", i)).collect();
    let ten: Vec<&str> = ten.iter().map(String::as_str).collect();
    h.serve_urlset("/sitemap.xml", &ten).await;
    h.serve_html("/pricing", 200, "Pricing", "<p>Plans from $10</p>").await;
    h.serve_html("/docs", 200, "Docs", "<p>Read the docs</p>").await;
    let first = h.orchestrator.run(RunType::Daily).await.unwrap();
    assert_eq!(first.succeeded, 1);
    assert!(h.store.findings_for_run(&first.run_id).unwrap().is_empty());

    h.reset().await;
    h.serve_urlset("/sitemap.xml", &["/page-0", "/page-1"]).await;
    h.serve_html("/pricing", 200, "Plans", "<p>Plans from $10</p>").await;
    h.serve_html("/docs", 404, "Not found", "<p>Gone</p>").await;
    let second = h.orchestrator.run(RunType::Daily).await.unwrap();

    let findings = h.store.findings_for_run(&second.run_id).unwrap();
    let found = titles(&findings);
    assert!(found.contains(&"Sitemap URL count dropped significantly"), "{:?}", found);
    assert!(found.contains(&"Page title changed"), "{:?}", found);
    assert!(found.contains(&"Page no longer found"), "{:?}", found);

    let gone = findings.iter().find(|f| f.title == "Page no longer found").unwrap();
    assert_eq!(gone.severity, Severity::Critical);
    assert_eq!(gone.category, FindingCategory::Availability);
    assert_eq!(gone.url, h.url("/docs"));
    assert_eq!(gone.details, "HTTP status: 200 -> 404");

    let coverage = second.coverage_of(&customer.id).unwrap();
    assert_eq!(coverage.sampled_urls, 2);
    assert_eq!(coverage.success_count, 1);
    assert_eq!(coverage.error_count, 1);
    assert_eq!(coverage.http_404_count, 1);
    let stored = h
        .store
        .get_coverage(&customer.id, &second.run_id, RunType::Daily)
        .unwrap()
        .unwrap();
    assert_eq!(&stored, coverage);

    // Daily alerts carry critical findings only
    let alerts = h.sink.alerts.lock();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].findings.iter().all(|f| f.severity == Severity::Critical));
    assert_eq!(alerts[0].findings.len(), 2);
}

#[tokio::test]
async fn test_same_condition_alerts_once_per_period() {
    let h = Harness::new().await;
    let customer = h.add_customer("Acme", None);
    h.store.add_target(&customer.id, &h.url("/landing"), None).unwrap();

    let mut run_ids = Vec::new();
    for status in [200, 404, 200, 404] {
        h.reset().await;
        h.serve_html("/landing", status, "Landing", "<p>Offer</p>").await;
        let summary = h.orchestrator.run(RunType::Daily).await.unwrap();
        run_ids.push(summary.run_id);
    }

    let not_found: Vec<_> = h
        .store
        .list_findings(Some(&customer.id), 50)
        .unwrap()
        .into_iter()
        .filter(|f| f.title == "Page no longer found")
        .collect();
    assert_eq!(not_found.len(), 1);
    assert_eq!(not_found[0].run_id, run_ids[1]);

    let recovered = h.store.findings_for_run(&run_ids[2]).unwrap();
    assert_eq!(titles(&recovered), vec!["Page available again"]);
    assert!(h.store.findings_for_run(&run_ids[3]).unwrap().is_empty());

    assert_eq!(h.sink.alerts.lock().len(), 1);
}

#[tokio::test]
async fn test_failing_customer_does_not_stop_the_run() {
    let h = Harness::new().await;
    let broken = h
        .store
        .create_customer(&NewCustomer {
            name: "Broken".to_string(),
            base_url: "not a url".to_string(),
            ..NewCustomer::default()
        })
        .unwrap();
    let healthy = h.add_customer("Healthy", None);
    h.serve_html("/", 200, "Home", "<p>Welcome</p>").await;

    let summary = h.orchestrator.run(RunType::Daily).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(matches!(summary.outcome_of(&broken.id), Some(CustomerOutcome::Failed { .. })));
    assert!(summary.coverage_of(&healthy.id).is_some());
    assert!(summary.coverage_of(&broken.id).is_none());

    let findings = h.store.list_findings(Some(&broken.id), 10).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].category, FindingCategory::System);
    assert_eq!(findings[0].severity, Severity::Critical);
    assert!(findings[0].details.contains("Invalid base URL"), "{}", findings[0].details);
}

#[tokio::test]
async fn test_inactive_customers_are_ignored() {
    let h = Harness::new().await;
    let paused = h.add_customer("Paused", None);
    h.add_customer("Active", None);
    h.store.set_customer_active(&paused.id, false).unwrap();

    let summary = h.orchestrator.run(RunType::Daily).await.unwrap();
    assert_eq!(summary.total, 1);
    assert!(summary.outcome_of(&paused.id).is_none());
}

#[tokio::test]
async fn test_stopped_run_skips_every_customer() {
    let h = Harness::new().await;
    h.add_customer("One", None);
    h.add_customer("Two", None);

    h.orchestrator.stop();
    let summary = h.orchestrator.run(RunType::Weekly).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.skipped, 2);
    assert!(summary.coverage.is_empty());
    assert!(h.server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_weekly_crawl_reports_broken_internal_links() {
    let h = Harness::new().await;
    let customer = h.add_customer("Acme", None);

    let index = format!(
        r#"<?xml version="1.0"?><sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"><sitemap><loc>{}</loc></sitemap></sitemapindex>"#,
        h.url("/sitemap-pages.xml")
    );
    h.serve("/sitemap.xml", 200, "application/xml", index).await;
    h.serve_urlset("/sitemap-pages.xml", &["/p1", "/p2", "/p3"]).await;
    h.serve_html("/", 200, "Home", "<p>Welcome</p>").await;
    h.serve_html(
        "/p1",
        200,
        "One",
        r#"<a href="/p2">two</a> <a href="/missing">gone</a> <a href="https://elsewhere.test/x">ext</a>"#,
    )
    .await;
    h.serve_html("/p2", 200, "Two", "<p>Two</p>").await;
    h.serve_html("/p3", 404, "Not found", "<p>Gone</p>").await;

    let summary = h.orchestrator.run(RunType::Weekly).await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let coverage = summary.coverage_of(&customer.id).unwrap();
    assert_eq!(coverage.total_urls, 4);
    assert_eq!(coverage.sampled_urls, 4);
    assert_eq!(coverage.success_count, 3);
    assert_eq!(coverage.error_count, 1);
    assert_eq!(coverage.http_404_count, 1);
    assert_eq!(coverage.broken_link_count, 1);

    // A page first seen as 404 has no baseline to regress from
    let findings = h.store.findings_for_run(&summary.run_id).unwrap();
    assert_eq!(findings.len(), 1);
    let broken = &findings[0];
    assert_eq!(broken.category, FindingCategory::BrokenLinks);
    assert_eq!(broken.severity, Severity::Warning);
    assert_eq!(broken.url, h.url("/missing"));
    assert!(broken.details.contains(&h.url("/p1")), "{}", broken.details);

    // Weekly digests carry every finding
    let alerts = h.sink.alerts.lock();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].run_type, RunType::Weekly);
    assert_eq!(alerts[0].counts.warning, 1);
}

#[tokio::test]
async fn test_weekly_sample_honours_customer_crawl_limit() {
    let h = Harness::new().await;
    let customer = h.add_customer("Acme", Some(2));

    h.serve_text("/robots.txt", "User-agent: *\nDisallow: /a\n").await;
    h.serve_urlset("/sitemap.xml", &["/a", "/b", "/c", "/d"]).await;
    for route in ["/", "/b", "/c", "/d"] {
        h.serve_html(route, 200, "Page", "<p>Text</p>").await;
    }

    let summary = h.orchestrator.run(RunType::Weekly).await.unwrap();
    let coverage = summary.coverage_of(&customer.id).unwrap();
    assert_eq!(coverage.total_urls, 5);
    assert_eq!(coverage.sampled_urls, 2);
    assert_eq!(coverage.success_count, 2);

    let requested: Vec<String> = h
        .server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(!requested.contains(&"/a".to_string()));
    assert!(requested.contains(&"/b".to_string()));
    assert!(!requested.contains(&"/c".to_string()));
}
