//! Fair fetch scheduler
//!
//! Interleaves fetches across customers in round-robin order while honoring a
//! per-domain 429 cooldown. One instance owns all domain state for one run;
//! the crawl controller is the only caller, so no internal locking is needed.
//!
//! Ordering:
//! - Within a customer, tasks are FIFO; retries go to the back of the queue.
//! - Across customers, service rotates by position. A customer whose head task
//!   is on a cooling domain is skipped in place, so one rate-limited domain
//!   never stalls unrelated customers.

use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::url_authority;
use crate::config::SchedulerSettings;
use crate::types::CustomerId;

/// Scheduler policy
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Relative jitter applied to each cooldown (0.2 = ±20%)
    pub jitter: f64,
    pub max_backoff: Duration,
    pub max_attempts_per_url: u32,
    /// Total 429s after which a domain's remaining tasks are dropped
    pub domain_429_ceiling: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_settings(&SchedulerSettings::default())
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
            jitter: settings.jitter,
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            max_attempts_per_url: settings.max_attempts_per_url,
            domain_429_ceiling: settings.domain_429_ceiling,
        }
    }

    /// `min(initial × multiplier^(consecutive-1) × (1 ± jitter), max)`,
    /// raised to `retry_after` (still capped) when the server asked for longer
    fn cooldown(&self, consecutive: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = consecutive.saturating_sub(1).min(64) as i32;
        let mut millis = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
            millis *= factor;
        }
        let cap = self.max_backoff.as_millis() as f64;
        let cooldown = Duration::from_millis(millis.min(cap).max(0.0) as u64);

        match retry_after {
            Some(requested) if requested > cooldown => requested.min(self.max_backoff),
            _ => cooldown,
        }
    }
}

/// One URL to fetch for one customer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub customer_id: CustomerId,
    pub url: String,
    /// 1 on first enqueue, incremented on each 429 retry
    pub attempt: u32,
    domain: String,
}

impl FetchTask {
    pub fn new(customer_id: impl Into<CustomerId>, url: impl Into<String>) -> Self {
        let url = url.into();
        let domain = url_authority(&url).unwrap_or_else(|| url.clone());
        Self {
            customer_id: customer_id.into(),
            url,
            attempt: 1,
            domain,
        }
    }

    /// URL authority; the unit of rate limiting
    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Per-domain rate-limit state
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    pub next_allowed_at: Option<Instant>,
    /// Never decreases during a scheduler's lifetime
    pub total_429_count: u32,
    pub consecutive_429_count: u32,
}

/// Point-in-time view of a domain, for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainStats {
    pub domain: String,
    pub total_429_count: u32,
    pub consecutive_429_count: u32,
    pub cooldown_remaining: Duration,
}

/// Outcome of reporting a 429
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// A copy of the task was queued again with this attempt number
    Requeued { attempt: u32, cooldown: Duration },
    /// The task will not be retried
    Dropped { cooldown: Duration },
}

/// A task the scheduler gave up on without handing it out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedTask {
    pub task: FetchTask,
    pub domain_429_count: u32,
}

/// Round-robin scheduler with per-domain cooldown
pub struct FetchScheduler {
    config: SchedulerConfig,
    queues: HashMap<CustomerId, VecDeque<FetchTask>>,
    order: VecDeque<CustomerId>,
    domains: HashMap<String, DomainState>,
    dropped: Vec<DroppedTask>,
}

impl FetchScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            queues: HashMap::new(),
            order: VecDeque::new(),
            domains: HashMap::new(),
            dropped: Vec::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Queue one task per URL for `customer_id`
    pub fn add_tasks<I, S>(&mut self, customer_id: &str, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tasks: Vec<FetchTask> = urls
            .into_iter()
            .map(|url| FetchTask::new(customer_id, url))
            .collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            self.enqueue(task);
        }
    }

    /// Next task ready to run, or `None` when every queue is empty or every
    /// remaining head task is on a cooling domain
    pub fn next_task(&mut self) -> Option<FetchTask> {
        self.next_task_at(Instant::now())
    }

    pub fn next_task_at(&mut self, now: Instant) -> Option<FetchTask> {
        let ceiling = self.config.domain_429_ceiling;
        let mut idx = 0;

        while idx < self.order.len() {
            let customer = self.order[idx].clone();
            let Some(queue) = self.queues.get_mut(&customer) else {
                self.order.remove(idx);
                continue;
            };

            // Domains past the ceiling are abandoned for the rest of the run
            while let Some(head) = queue.front() {
                let total = self.domains.get(head.domain()).map_or(0, |d| d.total_429_count);
                if total < ceiling {
                    break;
                }
                if let Some(task) = queue.pop_front() {
                    debug!(domain = %task.domain, url = %task.url, "dropping task, domain hit 429 ceiling");
                    self.dropped.push(DroppedTask {
                        task,
                        domain_429_count: total,
                    });
                }
            }

            let Some(head_domain) = queue.front().map(|t| t.domain.clone()) else {
                self.queues.remove(&customer);
                self.order.remove(idx);
                continue;
            };

            let cooling = self
                .domains
                .get(&head_domain)
                .and_then(|d| d.next_allowed_at)
                .map_or(false, |until| now < until);
            if cooling {
                idx += 1;
                continue;
            }

            let task = queue.pop_front();
            let drained = queue.is_empty();
            self.order.remove(idx);
            if drained {
                self.queues.remove(&customer);
            } else {
                self.order.push_back(customer);
            }
            return task;
        }

        None
    }

    /// A fetch for `task` succeeded; the domain's backoff starts over
    pub fn record_success(&mut self, task: &FetchTask) {
        if let Some(state) = self.domains.get_mut(task.domain()) {
            state.consecutive_429_count = 0;
        }
    }

    /// A fetch for `task` returned 429
    pub fn record_429(&mut self, task: &FetchTask, retry_after: Option<Duration>) -> RetryDecision {
        self.record_429_at(task, retry_after, Instant::now())
    }

    pub fn record_429_at(
        &mut self,
        task: &FetchTask,
        retry_after: Option<Duration>,
        now: Instant,
    ) -> RetryDecision {
        let state = self.domains.entry(task.domain.clone()).or_default();
        state.total_429_count += 1;
        state.consecutive_429_count += 1;

        let cooldown = self.config.cooldown(state.consecutive_429_count, retry_after);
        state.next_allowed_at = Some(now + cooldown);
        let total = state.total_429_count;

        if task.attempt < self.config.max_attempts_per_url && total < self.config.domain_429_ceiling {
            let retry = task.retry();
            let attempt = retry.attempt;
            debug!(
                domain = %task.domain,
                url = %task.url,
                attempt,
                cooldown_ms = cooldown.as_millis() as u64,
                "rate limited, requeued"
            );
            self.enqueue(retry);
            RetryDecision::Requeued { attempt, cooldown }
        } else {
            warn!(
                domain = %task.domain,
                url = %task.url,
                attempt = task.attempt,
                domain_429_count = total,
                "rate limited, giving up on url"
            );
            RetryDecision::Dropped { cooldown }
        }
    }

    /// A fetch for `task` failed permanently; no cooldown, no retry
    pub fn record_non_retryable_error(&mut self, task: &FetchTask) {
        debug!(domain = %task.domain, url = %task.url, "non-retryable failure, task dropped");
    }

    /// Whether any customer still holds a task, ready or cooling
    pub fn has_ready_tasks(&self) -> bool {
        self.queues.values().any(|q| !q.is_empty())
    }

    /// Number of queued tasks across all customers
    pub fn pending_count(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn domain_stats(&self) -> Vec<DomainStats> {
        let now = Instant::now();
        let mut stats: Vec<DomainStats> = self
            .domains
            .iter()
            .map(|(domain, state)| DomainStats {
                domain: domain.clone(),
                total_429_count: state.total_429_count,
                consecutive_429_count: state.consecutive_429_count,
                cooldown_remaining: state
                    .next_allowed_at
                    .map(|until| until.saturating_duration_since(now))
                    .unwrap_or_default(),
            })
            .collect();
        stats.sort_by(|a, b| a.domain.cmp(&b.domain));
        stats
    }

    /// Tasks dropped by the domain ceiling since the last call
    pub fn take_dropped(&mut self) -> Vec<DroppedTask> {
        std::mem::take(&mut self.dropped)
    }

    /// Remove and return every queued task (used when a crawl is aborted)
    pub fn drain_pending(&mut self) -> Vec<FetchTask> {
        let mut pending = Vec::new();
        for customer in self.order.drain(..) {
            if let Some(queue) = self.queues.remove(&customer) {
                pending.extend(queue);
            }
        }
        for (_, queue) in self.queues.drain() {
            pending.extend(queue);
        }
        pending
    }

    fn enqueue(&mut self, task: FetchTask) {
        let customer = task.customer_id.clone();
        let queue = self.queues.entry(customer.clone()).or_default();
        queue.push_back(task);
        if !self.order.contains(&customer) {
            self.order.push_back(customer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            initial_backoff: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            jitter: 0.0,
            max_backoff: Duration::from_millis(5000),
            max_attempts_per_url: 3,
            domain_429_ceiling: 10,
        }
    }

    fn urls(next: &mut FetchScheduler, now: Instant) -> Vec<String> {
        std::iter::from_fn(|| next.next_task_at(now)).map(|t| t.url).collect()
    }

    #[test]
    fn round_robin_across_customers() {
        let mut scheduler = FetchScheduler::new(config());
        scheduler.add_tasks("a", ["https://a1.test/", "https://a2.test/"]);
        scheduler.add_tasks("b", ["https://b1.test/", "https://b2.test/"]);

        let order: Vec<String> = std::iter::from_fn(|| scheduler.next_task())
            .map(|t| t.customer_id)
            .collect();
        assert_eq!(order, vec!["a", "b", "a", "b"]);
        assert!(scheduler.next_task().is_none());
        assert!(!scheduler.has_ready_tasks());
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let mut scheduler = FetchScheduler::new(config());
        scheduler.add_tasks("a", Vec::<String>::new());
        assert!(!scheduler.has_ready_tasks());
        assert!(scheduler.next_task().is_none());
    }

    #[test]
    fn rate_limit_on_one_domain_does_not_block_others() {
        let mut scheduler = FetchScheduler::new(config());
        scheduler.add_tasks("a", ["https://one.test/x"]);
        scheduler.add_tasks("b", ["https://two.test/x"]);
        scheduler.add_tasks("c", ["https://three.test/x"]);

        let first = scheduler.next_task().unwrap();
        assert_eq!(first.domain(), "one.test");
        let decision = scheduler.record_429(&first, None);
        assert!(matches!(decision, RetryDecision::Requeued { attempt: 2, .. }));

        let next = scheduler.next_task().unwrap();
        assert_ne!(next.domain(), "one.test");
        let after = scheduler.next_task().unwrap();
        assert_ne!(after.domain(), "one.test");

        // Only the cooling retry is left
        assert!(scheduler.next_task().is_none());
        assert!(scheduler.has_ready_tasks());
    }

    #[test]
    fn cooling_customer_keeps_its_position() {
        let mut scheduler = FetchScheduler::new(config());
        let now = Instant::now();
        scheduler.add_tasks("a", ["https://slow.test/1", "https://slow.test/2"]);
        scheduler.add_tasks("b", ["https://fast.test/1", "https://fast.test/2", "https://fast.test/3"]);

        let a1 = scheduler.next_task_at(now).unwrap();
        scheduler.record_429_at(&a1, None, now);

        // a is skipped while cooling
        assert_eq!(scheduler.next_task_at(now).unwrap().url, "https://fast.test/1");
        assert_eq!(scheduler.next_task_at(now).unwrap().url, "https://fast.test/2");

        // Once the cooldown passes, a is served before b again
        let later = now + Duration::from_millis(1001);
        assert_eq!(scheduler.next_task_at(later).unwrap().url, "https://slow.test/2");
        assert_eq!(scheduler.next_task_at(later).unwrap().url, "https://fast.test/3");
        let retry = scheduler.next_task_at(later).unwrap();
        assert_eq!(retry.url, "https://slow.test/1");
        assert_eq!(retry.attempt, 2);
    }

    #[test]
    fn backoff_grows_and_resets_after_success() {
        let mut scheduler = FetchScheduler::new(config());
        let task = FetchTask::new("a", "https://example.test/");

        let cooldowns: Vec<Duration> = (0..5)
            .map(|_| match scheduler.record_429(&task, None) {
                RetryDecision::Requeued { cooldown, .. } | RetryDecision::Dropped { cooldown } => cooldown,
            })
            .collect();
        assert_eq!(
            cooldowns,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(5000),
                Duration::from_millis(5000),
            ]
        );

        scheduler.record_success(&task);
        let stats = scheduler.domain_stats();
        assert_eq!(stats[0].consecutive_429_count, 0);
        assert_eq!(stats[0].total_429_count, 5);

        match scheduler.record_429(&task, None) {
            RetryDecision::Requeued { cooldown, .. } | RetryDecision::Dropped { cooldown } => {
                assert_eq!(cooldown, Duration::from_millis(1000))
            }
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let cfg = SchedulerConfig {
            jitter: 0.2,
            ..config()
        };
        for _ in 0..50 {
            let c = cfg.cooldown(1, None);
            assert!(c >= Duration::from_millis(800) && c <= Duration::from_millis(1200), "{:?}", c);
        }
    }

    #[test]
    fn retry_after_raises_cooldown_up_to_cap() {
        let cfg = config();
        assert_eq!(cfg.cooldown(1, Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(cfg.cooldown(1, Some(Duration::from_secs(60))), Duration::from_secs(5));
        assert_eq!(cfg.cooldown(2, Some(Duration::from_millis(10))), Duration::from_secs(2));
    }

    #[test]
    fn task_is_dropped_after_max_attempts() {
        let mut scheduler = FetchScheduler::new(config());
        let mut now = Instant::now();
        scheduler.add_tasks("a", ["https://limited.test/page"]);

        let mut served = 0;
        while let Some(task) = scheduler.next_task_at(now) {
            served += 1;
            let decision = scheduler.record_429_at(&task, None, now);
            if served == 3 {
                assert!(matches!(decision, RetryDecision::Dropped { .. }));
            }
            now += Duration::from_secs(10);
        }
        assert_eq!(served, 3);
        assert!(!scheduler.has_ready_tasks());
        assert!(scheduler.next_task_at(now + Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn domain_ceiling_drops_remaining_tasks() {
        let cfg = SchedulerConfig {
            domain_429_ceiling: 2,
            max_attempts_per_url: 5,
            ..config()
        };
        let mut scheduler = FetchScheduler::new(cfg);
        let mut now = Instant::now();
        scheduler.add_tasks(
            "a",
            ["https://busy.test/1", "https://busy.test/2", "https://busy.test/3"],
        );
        scheduler.add_tasks("b", ["https://calm.test/1"]);

        let t1 = scheduler.next_task_at(now).unwrap();
        assert!(matches!(
            scheduler.record_429_at(&t1, None, now),
            RetryDecision::Requeued { .. }
        ));
        now += Duration::from_secs(10);

        assert_eq!(scheduler.next_task_at(now).unwrap().url, "https://calm.test/1");
        let t2 = scheduler.next_task_at(now).unwrap();
        assert_eq!(t2.url, "https://busy.test/2");
        // Second 429 reaches the ceiling: no requeue
        assert!(matches!(
            scheduler.record_429_at(&t2, None, now),
            RetryDecision::Dropped { .. }
        ));
        now += Duration::from_secs(10);

        assert_eq!(urls(&mut scheduler, now), Vec::<String>::new());
        let dropped: Vec<String> = scheduler.take_dropped().into_iter().map(|d| d.task.url).collect();
        assert_eq!(dropped, vec!["https://busy.test/3", "https://busy.test/1"]);
        assert!(!scheduler.has_ready_tasks());
    }

    #[test]
    fn drain_pending_empties_queues() {
        let mut scheduler = FetchScheduler::new(config());
        scheduler.add_tasks("a", ["https://a.test/1", "https://a.test/2"]);
        scheduler.add_tasks("b", ["https://b.test/1"]);
        assert_eq!(scheduler.pending_count(), 3);

        let drained = scheduler.drain_pending();
        assert_eq!(drained.len(), 3);
        assert!(!scheduler.has_ready_tasks());
        assert!(scheduler.next_task().is_none());
    }
}
