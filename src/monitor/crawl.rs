//! Crawl controller
//!
//! One loop owns the scheduler. Fetches run concurrently in a bounded
//! `JoinSet`, but every outcome comes back to this loop and is recorded on the
//! scheduler under its mutex, so domain state has a single writer.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::fetcher::{FetchResponse, PageFetcher};
use super::scheduler::{DomainStats, FetchScheduler, FetchTask, RetryDecision};
use crate::config::SchedulerSettings;
use crate::types::CustomerId;

/// Controller loop settings
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Maximum fetches in flight
    pub max_concurrency: usize,
    /// Sleep between polls while every remaining domain is cooling down
    pub idle_poll: Duration,
    /// Total idle time after which the crawl is abandoned
    pub max_idle: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self::from_settings(&SchedulerSettings::default())
    }
}

impl CrawlOptions {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            max_concurrency: settings.max_concurrency.max(1),
            idle_poll: Duration::from_millis(settings.idle_poll_ms),
            max_idle: Duration::from_secs(settings.max_idle_secs),
        }
    }
}

/// How a task ended
#[derive(Debug, Clone)]
pub enum CrawlOutcome {
    /// Final response for the URL (success, error, or a 429 out of retries)
    Fetched(FetchResponse),
    /// Never fetched to completion
    Dropped(String),
}

/// Final record for one scheduled URL
#[derive(Debug, Clone)]
pub struct CrawlRecord {
    pub customer_id: CustomerId,
    pub url: String,
    pub attempt: u32,
    pub outcome: CrawlOutcome,
}

impl CrawlRecord {
    pub fn response(&self) -> Option<&FetchResponse> {
        match &self.outcome {
            CrawlOutcome::Fetched(response) => Some(response),
            CrawlOutcome::Dropped(_) => None,
        }
    }

    /// Fetched with a non-error status
    pub fn is_success(&self) -> bool {
        self.response().map_or(false, is_success)
    }
}

/// Everything a crawl produced
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub records: Vec<CrawlRecord>,
    /// 429 responses seen per customer, retries included
    pub rate_limited: HashMap<CustomerId, u64>,
    pub domain_stats: Vec<DomainStats>,
    /// The crawl ended early (stop requested or idle ceiling reached)
    pub aborted: bool,
}

impl CrawlReport {
    pub fn records_for<'a>(&'a self, customer_id: &'a str) -> impl Iterator<Item = &'a CrawlRecord> + 'a {
        self.records.iter().filter(move |r| r.customer_id == customer_id)
    }

    pub fn rate_limited_for(&self, customer_id: &str) -> u64 {
        self.rate_limited.get(customer_id).copied().unwrap_or(0)
    }

    pub fn dropped(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, CrawlOutcome::Dropped(_)))
            .count()
    }
}

fn is_success(response: &FetchResponse) -> bool {
    response.error_kind.is_none() && matches!(response.status_code, Some(code) if code < 400)
}

/// Drive `scheduler` until it is empty, stopped, or idle for too long
pub async fn run_crawl(
    scheduler: &Mutex<FetchScheduler>,
    fetcher: Arc<dyn PageFetcher>,
    options: &CrawlOptions,
    stop: &AtomicBool,
) -> CrawlReport {
    let mut report = CrawlReport::default();
    let mut in_flight: JoinSet<(FetchTask, FetchResponse)> = JoinSet::new();
    let mut idle = Duration::ZERO;
    let mut stopping = false;

    info!(pending = scheduler.lock().pending_count(), "crawl started");

    loop {
        if !stopping && stop.load(Ordering::SeqCst) {
            info!(in_flight = in_flight.len(), "stop requested, finishing in-flight fetches");
            stopping = true;
            report.aborted = true;
        }

        if !stopping {
            while in_flight.len() < options.max_concurrency {
                let Some(task) = scheduler.lock().next_task() else {
                    break;
                };
                let fetcher = Arc::clone(&fetcher);
                in_flight.spawn(async move {
                    let response = fetcher.fetch(&task.url).await;
                    (task, response)
                });
            }
        }

        for dropped in scheduler.lock().take_dropped() {
            report.records.push(CrawlRecord {
                customer_id: dropped.task.customer_id.clone(),
                url: dropped.task.url.clone(),
                attempt: dropped.task.attempt,
                outcome: CrawlOutcome::Dropped(format!(
                    "domain {} reached {} rate-limit responses",
                    dropped.task.domain(),
                    dropped.domain_429_count
                )),
            });
        }

        if in_flight.is_empty() {
            if stopping || !scheduler.lock().has_ready_tasks() {
                break;
            }
            if idle >= options.max_idle {
                warn!(
                    idle_secs = idle.as_secs(),
                    pending = scheduler.lock().pending_count(),
                    "every remaining domain is cooling down, abandoning crawl"
                );
                report.aborted = true;
                break;
            }
            tokio::time::sleep(options.idle_poll).await;
            idle += options.idle_poll;
            continue;
        }

        tokio::select! {
            joined = in_flight.join_next() => match joined {
                Some(Ok((task, response))) => record_outcome(scheduler, &mut report, task, response),
                Some(Err(e)) => warn!(error = %e, "fetch worker failed"),
                None => {}
            },
            // Wake periodically so cooled-down domains are dispatched
            // without waiting for a slow in-flight fetch
            _ = tokio::time::sleep(options.idle_poll) => {}
        }
    }

    let reason = if stop.load(Ordering::SeqCst) {
        "run stopped"
    } else {
        "crawl abandoned while rate limited"
    };
    for task in scheduler.lock().drain_pending() {
        report.records.push(CrawlRecord {
            customer_id: task.customer_id.clone(),
            url: task.url.clone(),
            attempt: task.attempt,
            outcome: CrawlOutcome::Dropped(reason.to_string()),
        });
    }

    report.domain_stats = scheduler.lock().domain_stats();
    info!(
        records = report.records.len(),
        dropped = report.dropped(),
        aborted = report.aborted,
        "crawl finished"
    );
    report
}

fn record_outcome(
    scheduler: &Mutex<FetchScheduler>,
    report: &mut CrawlReport,
    task: FetchTask,
    response: FetchResponse,
) {
    if response.is_rate_limited() {
        *report.rate_limited.entry(task.customer_id.clone()).or_insert(0) += 1;
        let decision = scheduler.lock().record_429(&task, response.retry_after);
        if let RetryDecision::Requeued { .. } = decision {
            return;
        }
    } else if is_success(&response) {
        scheduler.lock().record_success(&task);
    } else {
        debug!(
            url = %task.url,
            status = ?response.status_code,
            kind = response.error_kind.map(|k| k.as_str()).unwrap_or("none"),
            "fetch failed"
        );
        scheduler.lock().record_non_retryable_error(&task);
    }

    report.records.push(CrawlRecord {
        customer_id: task.customer_id,
        url: task.url,
        attempt: task.attempt,
        outcome: CrawlOutcome::Fetched(response),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::scheduler::SchedulerConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Serves scripted responses per URL, then 200s
    #[derive(Default)]
    struct ScriptedFetcher {
        scripts: Mutex<HashMap<String, VecDeque<u16>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn script(self, url: &str, statuses: &[u16]) -> Self {
            self.scripts
                .lock()
                .insert(url.to_string(), statuses.iter().copied().collect());
            self
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> FetchResponse {
            self.calls.lock().push(url.to_string());
            let status = self
                .scripts
                .lock()
                .get_mut(url)
                .and_then(VecDeque::pop_front)
                .unwrap_or(200);
            FetchResponse::with_status(url, status, "<html><body>ok</body></html>")
        }
    }

    fn fast_scheduler(initial_backoff: Duration) -> Mutex<FetchScheduler> {
        Mutex::new(FetchScheduler::new(SchedulerConfig {
            initial_backoff,
            backoff_multiplier: 2.0,
            jitter: 0.0,
            max_backoff: Duration::from_secs(30),
            max_attempts_per_url: 3,
            domain_429_ceiling: 10,
        }))
    }

    fn options(max_idle: Duration) -> CrawlOptions {
        CrawlOptions {
            max_concurrency: 2,
            idle_poll: Duration::from_millis(5),
            max_idle,
        }
    }

    #[tokio::test]
    async fn crawls_every_customer() {
        let scheduler = fast_scheduler(Duration::from_millis(10));
        scheduler.lock().add_tasks("a", ["https://a.test/1", "https://a.test/2"]);
        scheduler.lock().add_tasks("b", ["https://b.test/1"]);
        let fetcher = Arc::new(ScriptedFetcher::default().script("https://a.test/2", &[404]));

        let report = run_crawl(&scheduler, fetcher.clone(), &options(Duration::from_secs(1)), &AtomicBool::new(false)).await;

        assert!(!report.aborted);
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.records_for("a").count(), 2);
        assert_eq!(report.records_for("a").filter(|r| r.is_success()).count(), 1);
        assert_eq!(fetcher.calls.lock().len(), 3);
        assert!(!scheduler.lock().has_ready_tasks());
    }

    #[tokio::test]
    async fn rate_limited_url_is_retried_after_cooldown() {
        let scheduler = fast_scheduler(Duration::from_millis(10));
        scheduler.lock().add_tasks("a", ["https://a.test/page"]);
        scheduler.lock().add_tasks("b", ["https://b.test/page"]);
        let fetcher = Arc::new(ScriptedFetcher::default().script("https://a.test/page", &[429]));

        let report = run_crawl(&scheduler, fetcher.clone(), &options(Duration::from_secs(2)), &AtomicBool::new(false)).await;

        assert_eq!(report.rate_limited_for("a"), 1);
        assert_eq!(report.rate_limited_for("b"), 0);
        let record = report.records_for("a").next().unwrap();
        assert_eq!(record.attempt, 2);
        assert!(record.is_success());
        assert_eq!(report.records.len(), 2);
        let stats = &report.domain_stats[0];
        assert_eq!(stats.domain, "a.test");
        assert_eq!(stats.total_429_count, 1);
        assert_eq!(stats.consecutive_429_count, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_keep_the_last_response() {
        let scheduler = fast_scheduler(Duration::from_millis(1));
        scheduler.lock().add_tasks("a", ["https://a.test/page"]);
        let fetcher = Arc::new(ScriptedFetcher::default().script("https://a.test/page", &[429, 429, 429, 429]));

        let report = run_crawl(&scheduler, fetcher.clone(), &options(Duration::from_secs(2)), &AtomicBool::new(false)).await;

        assert_eq!(fetcher.calls.lock().len(), 3);
        assert_eq!(report.records.len(), 1);
        let response = report.records[0].response().unwrap();
        assert!(response.is_rate_limited());
        assert_eq!(report.rate_limited_for("a"), 3);
    }

    #[tokio::test]
    async fn later_round_on_same_scheduler_keeps_domain_ceiling() {
        let scheduler = Mutex::new(FetchScheduler::new(SchedulerConfig {
            initial_backoff: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            jitter: 0.0,
            max_backoff: Duration::from_secs(30),
            max_attempts_per_url: 3,
            domain_429_ceiling: 2,
        }));
        scheduler.lock().add_tasks("a", ["https://a.test/page"]);
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .script("https://a.test/page", &[429, 429])
                .script("https://a.test/linked", &[429]),
        );

        let pages = run_crawl(&scheduler, fetcher.clone(), &options(Duration::from_secs(2)), &AtomicBool::new(false)).await;
        assert_eq!(pages.rate_limited_for("a"), 2);
        assert_eq!(fetcher.calls.lock().len(), 2);

        scheduler.lock().add_tasks("a", ["https://a.test/linked", "https://b.test/linked"]);
        let links = run_crawl(&scheduler, fetcher.clone(), &options(Duration::from_secs(2)), &AtomicBool::new(false)).await;

        let calls = fetcher.calls.lock().clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], "https://b.test/linked");
        assert_eq!(links.dropped(), 1);
        let dropped = links.records.iter().find(|r| r.url == "https://a.test/linked").unwrap();
        assert!(matches!(dropped.outcome, CrawlOutcome::Dropped(_)));
        assert_eq!(links.rate_limited_for("a"), 0);
    }

    #[tokio::test]
    async fn idle_ceiling_abandons_cooling_work() {
        let scheduler = fast_scheduler(Duration::from_secs(30));
        scheduler.lock().add_tasks("a", ["https://a.test/page"]);
        let fetcher = Arc::new(ScriptedFetcher::default().script("https://a.test/page", &[429]));

        let report = run_crawl(&scheduler, fetcher, &options(Duration::from_millis(50)), &AtomicBool::new(false)).await;

        assert!(report.aborted);
        assert_eq!(report.dropped(), 1);
        assert_eq!(report.records[0].attempt, 2);
        assert!(!scheduler.lock().has_ready_tasks());
    }

    #[tokio::test]
    async fn stop_flag_skips_dispatch() {
        let scheduler = fast_scheduler(Duration::from_millis(10));
        scheduler.lock().add_tasks("a", ["https://a.test/1", "https://a.test/2"]);
        let fetcher = Arc::new(ScriptedFetcher::default());

        let report = run_crawl(&scheduler, fetcher.clone(), &options(Duration::from_secs(1)), &AtomicBool::new(true)).await;

        assert!(report.aborted);
        assert!(fetcher.calls.lock().is_empty());
        assert_eq!(report.dropped(), 2);
    }
}
