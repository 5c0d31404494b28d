use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Semaphore};

use trawler_common::config::{FrontierConfig, SchedulerConfig};
use trawler_common::priority::{self, PrioritySignals};
use trawler_common::types::{ScrapeOutcome, ScrapeResult, SchedulerState, SchedulerStats};
use trawler_common::urls;
use trawler_common::{JobId, Result};
use trawler_fetcher::Fetcher;
use trawler_frontier::UrlFrontier;

use crate::hosts::HostRegistry;
use crate::jobs::JobTable;
use crate::rate_limit::{HostRateLimiter, SlidingWindow};

/// Consecutive server-side errors before a host is blocked.
const BLOCK_ERROR_STREAK: u32 = 5;
/// How long a blocked host stays blocked, in seconds.
const BLOCK_DURATION_SECONDS: f64 = 300.0;

/// Drives the frontier: hands URLs to bounded worker tasks, applies
/// adaptive politeness, global and per-host rate limits, backpressure
/// against the queue depth, and status-code-driven host policies.
///
/// Lifecycle: Idle → Running ⇄ Paused → Stopping → Stopped. `stop` waits
/// for in-flight workers to finish their current URL.
pub struct CrawlScheduler {
    frontier: Arc<UrlFrontier>,
    fetcher: Arc<Fetcher>,
    config: SchedulerConfig,
    hosts: Arc<HostRegistry>,
    jobs: Arc<JobTable>,
    stats: Mutex<SchedulerStats>,
    global_window: SlidingWindow,
    host_window: HostRateLimiter,
    worker_permits: Arc<Semaphore>,
    stop: watch::Sender<bool>,
    paused: watch::Sender<bool>,
    backpressure_active: AtomicBool,
}

impl CrawlScheduler {
    pub fn new(
        frontier: Arc<UrlFrontier>,
        fetcher: Arc<Fetcher>,
        config: SchedulerConfig,
        frontier_config: &FrontierConfig,
        jobs: Arc<JobTable>,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        let (paused, _) = watch::channel(false);

        Self {
            global_window: SlidingWindow::new(
                config.max_requests_per_second.ceil() as usize,
                Duration::from_secs(1),
            ),
            host_window: HostRateLimiter::new(
                config.max_requests_per_host_per_minute as usize,
                Duration::from_secs(60),
            ),
            worker_permits: Arc::new(Semaphore::new(config.max_workers)),
            hosts: Arc::new(HostRegistry::new(frontier_config.default_delay)),
            frontier,
            fetcher,
            config,
            jobs,
            stats: Mutex::new(SchedulerStats::default()),
            stop,
            paused,
            backpressure_active: AtomicBool::new(false),
        }
    }

    /// Run until stopped or idle past `idle_timeout`. Waits for in-flight
    /// workers before returning.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        {
            let mut stats = self.stats.lock().unwrap();
            if stats.state == SchedulerState::Running {
                tracing::warn!("Scheduler is already running");
                return Ok(());
            }
            *stats = SchedulerStats {
                state: SchedulerState::Running,
                started_at: Some(unix_now()),
                ..SchedulerStats::default()
            };
        }
        self.stop.send_replace(false);
        tracing::info!(
            max_workers = self.config.max_workers,
            max_rps = self.config.max_requests_per_second,
            "Scheduler started"
        );

        let outcome = self.main_loop().await;

        self.set_state(SchedulerState::Stopping);
        tracing::info!("Waiting for in-flight workers to complete");
        // Claiming every permit is the barrier for worker completion.
        let drain = self
            .worker_permits
            .acquire_many(self.config.max_workers as u32)
            .await;
        drop(drain);
        self.set_state(SchedulerState::Stopped);
        tracing::info!("Scheduler stopped");

        outcome
    }

    async fn main_loop(self: &Arc<Self>) -> Result<()> {
        let mut stop_rx = self.stop.subscribe();
        let mut paused_rx = self.paused.subscribe();
        let mut idle_since: Option<Instant> = None;
        let mut last_stats_log = Instant::now();

        loop {
            if *stop_rx.borrow() {
                break;
            }

            // Pause gate: wait for resume or stop.
            if *paused_rx.borrow() {
                self.set_state(SchedulerState::Paused);
                tracing::info!("Scheduler paused");
                loop {
                    tokio::select! {
                        changed = paused_rx.changed() => {
                            if changed.is_err() || !*paused_rx.borrow() {
                                break;
                            }
                        }
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() {
                                return Ok(());
                            }
                        }
                    }
                }
                self.set_state(SchedulerState::Running);
                tracing::info!("Scheduler resumed");
                idle_since = None;
            }

            // Backpressure with hysteresis: trips above the high watermark,
            // releases below the low watermark.
            let depth = self.frontier.queue_depth().await?;
            metrics::gauge!("scheduler.queue_depth").set(depth as f64);
            let active = self.backpressure_active.load(Ordering::Relaxed);
            if depth > self.config.queue_high_watermark
                || (active && depth >= self.config.queue_low_watermark)
            {
                if !active {
                    self.backpressure_active.store(true, Ordering::Relaxed);
                    self.stats.lock().unwrap().backpressure_events += 1;
                    metrics::counter!("scheduler.backpressure_events").increment(1);
                    tracing::warn!(depth = depth, "Backpressure active, slowing down");
                }
                tokio::time::sleep(Duration::from_secs_f64(
                    self.config.backpressure_delay_seconds,
                ))
                .await;
                continue;
            } else if active {
                self.backpressure_active.store(false, Ordering::Relaxed);
                tracing::info!(depth = depth, "Backpressure released");
            }

            match self.frontier.next(Duration::from_secs(1)).await? {
                Some(url) => {
                    idle_since = None;

                    let Some(host) = urls::host_of(&url) else {
                        continue;
                    };

                    // Both rate limits must be satisfied before dispatch.
                    self.global_window.acquire().await;
                    self.host_window.acquire(&host).await;

                    let Ok(permit) =
                        Arc::clone(&self.worker_permits).acquire_owned().await
                    else {
                        break;
                    };

                    self.stats.lock().unwrap().urls_scheduled += 1;

                    let scheduler = Arc::clone(self);
                    tokio::spawn(async move {
                        metrics::gauge!("scheduler.active_workers").increment(1.0);
                        scheduler.process_url(&url, &host).await;
                        metrics::gauge!("scheduler.active_workers").decrement(1.0);
                        drop(permit);
                    });
                }
                None => {
                    let idle_start = *idle_since.get_or_insert_with(Instant::now);
                    if idle_start.elapsed()
                        >= Duration::from_secs_f64(self.config.idle_timeout_seconds)
                    {
                        tracing::info!("Idle timeout reached, no URLs to crawl");
                        break;
                    }
                }
            }

            {
                let rps = self.global_window.current_count().await as f64;
                self.stats.lock().unwrap().requests_per_second = rps;
            }

            if last_stats_log.elapsed()
                >= Duration::from_secs_f64(self.config.stats_interval_seconds)
            {
                self.log_stats();
                last_stats_log = Instant::now();
            }
        }

        Ok(())
    }

    /// Worker body for one URL.
    async fn process_url(self: &Arc<Self>, url: &str, host: &str) {
        let blocked = self
            .hosts
            .with_host(host, |state| {
                if state.is_blocked {
                    if state.blocked_until.is_some_and(|until| unix_now() < until) {
                        return true;
                    }
                    state.is_blocked = false;
                    state.blocked_until = None;
                }
                false
            })
            .await;

        if blocked {
            tracing::debug!(host = %host, url = %url, "Host blocked, re-admitting at low priority");
            if let Err(e) = self.frontier.admit(url, -100.0, None, true).await {
                tracing::error!(url = %url, error = %e, "Failed to re-admit URL for blocked host");
            }
            return;
        }

        let metadata = self.frontier.metadata_of(url).await.unwrap_or_default();

        let fetched = tokio::time::timeout(
            Duration::from_secs_f64(self.config.url_fetch_timeout_seconds),
            self.fetcher.fetch(url, None),
        )
        .await;

        match fetched {
            Ok(result) => self.apply_result(url, host, result, &metadata).await,
            Err(_) => {
                // Overall deadline blown: same as the server-error path,
                // minus the status code.
                tracing::error!(url = %url, "Worker fetch exceeded overall timeout");
                self.record_host_failure(host, 0, true).await;
                let _ = self.frontier.mark_crawled(url, false).await;
                self.stats.lock().unwrap().urls_failed += 1;
                if let Some(job_id) = job_of(&metadata) {
                    self.jobs.record_crawled(job_id, false);
                }
            }
        }
    }

    async fn apply_result(
        self: &Arc<Self>,
        url: &str,
        host: &str,
        result: ScrapeResult,
        metadata: &HashMap<String, String>,
    ) {
        let status = result.status_code.unwrap_or(0);

        match result.outcome {
            ScrapeOutcome::Success => {
                self.hosts
                    .with_host(host, |state| {
                        state.total_requests += 1;
                        state.last_status_code = status;
                        state.successful_requests += 1;
                        state.total_response_time += result.response_time;
                        state.consecutive_errors = 0;
                    })
                    .await;

                match self
                    .frontier
                    .update_delay_from_response(host, result.response_time)
                    .await
                {
                    Ok(delay) => {
                        self.hosts
                            .with_host(host, |state| state.crawl_delay = delay)
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!(host = %host, error = %e, "Failed to update adaptive delay")
                    }
                }

                let _ = self.frontier.mark_crawled(url, true).await;

                {
                    let mut stats = self.stats.lock().unwrap();
                    stats.urls_completed += 1;
                    stats.total_bytes_downloaded += result.bytes_downloaded;
                }
                metrics::counter!("scheduler.pages.completed").increment(1);
                metrics::counter!("scheduler.bytes_downloaded")
                    .increment(result.bytes_downloaded);

                self.expand_links(url, &result, metadata).await;
            }

            ScrapeOutcome::RateLimited => {
                let current_delay = self
                    .hosts
                    .with_host(host, |state| {
                        state.total_requests += 1;
                        state.last_status_code = status;
                        state.failed_requests += 1;
                        state.consecutive_errors += 1;
                        state.crawl_delay
                    })
                    .await;

                // Widen the delay well past the adaptive formula.
                match self.frontier.set_delay(host, current_delay * 2.0).await {
                    Ok(widened) => {
                        self.hosts
                            .with_host(host, |state| state.crawl_delay = widened)
                            .await;
                        tracing::warn!(
                            host = %host,
                            delay = widened,
                            "Rate limited, widened crawl delay"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(host = %host, error = %e, "Failed to widen crawl delay")
                    }
                }

                // Back of the queue, and skip the dedup check — the URL is
                // already in the Bloom filter.
                if let Err(e) = self.frontier.admit(url, -50.0, None, true).await {
                    tracing::error!(url = %url, error = %e, "Failed to re-admit rate-limited URL");
                }
                // Deliberately not marked crawled.
            }

            ScrapeOutcome::CircuitOpen => {
                // Dropped by policy: the operator can re-admit once the
                // host recovers.
                tracing::debug!(url = %url, host = %host, "Dropped, circuit open");
                let _ = self.frontier.mark_crawled(url, false).await;
                self.stats.lock().unwrap().urls_failed += 1;
                if let Some(job_id) = job_of(metadata) {
                    self.jobs.record_crawled(job_id, false);
                }
            }

            ScrapeOutcome::Timeout
            | ScrapeOutcome::ConnectionError
            | ScrapeOutcome::UnknownError => {
                self.record_host_failure(host, status, true).await;
                let _ = self.frontier.mark_crawled(url, false).await;
                self.stats.lock().unwrap().urls_failed += 1;
                if let Some(job_id) = job_of(metadata) {
                    self.jobs.record_crawled(job_id, false);
                }
            }

            ScrapeOutcome::HttpError | ScrapeOutcome::Blocked
            | ScrapeOutcome::ExtractionError => {
                let server_side = status >= 500;
                self.record_host_failure(host, status, server_side).await;
                let _ = self.frontier.mark_crawled(url, false).await;
                self.stats.lock().unwrap().urls_failed += 1;
                if let Some(job_id) = job_of(metadata) {
                    self.jobs.record_crawled(job_id, false);
                }
            }
        }
    }

    /// Shared failure bookkeeping; `streak` failures contribute to the
    /// consecutive-error count that blocks a host.
    async fn record_host_failure(&self, host: &str, status: u16, streak: bool) {
        self.hosts
            .with_host(host, |state| {
                state.total_requests += 1;
                state.last_status_code = status;
                state.failed_requests += 1;
                if streak {
                    state.consecutive_errors += 1;
                    if state.consecutive_errors >= BLOCK_ERROR_STREAK && !state.is_blocked {
                        state.is_blocked = true;
                        state.blocked_until = Some(unix_now() + BLOCK_DURATION_SECONDS);
                        tracing::warn!(
                            host = %state.host,
                            errors = state.consecutive_errors,
                            "Host blocked after consecutive errors"
                        );
                        metrics::counter!("scheduler.hosts_blocked").increment(1);
                    }
                }
            })
            .await;
    }

    /// Admit a successful page's outbound links under its job's policy.
    /// URLs admitted outside a job (bulk admits) do not expand.
    async fn expand_links(
        &self,
        url: &str,
        result: &ScrapeResult,
        metadata: &HashMap<String, String>,
    ) {
        let Some(job_id) = job_of(metadata) else {
            return;
        };

        let within_budget = self.jobs.record_crawled(job_id, true);
        if !within_budget || !self.jobs.is_active(job_id) {
            return;
        }
        let Some(policy) = self.jobs.policy_for(job_id) else {
            return;
        };

        let depth: u32 = metadata
            .get("depth")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let child_depth = depth + 1;
        if policy.max_depth.is_some_and(|max| child_depth > max) {
            return;
        }

        let parent_priority: f64 = metadata
            .get("priority")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0.0);

        let mut admitted = 0u64;
        for link in &result.links {
            if !policy.allows(link) {
                continue;
            }

            let score = priority::score(link, PrioritySignals::child_of(parent_priority, child_depth));
            let child_metadata = HashMap::from([
                ("depth".to_string(), child_depth.to_string()),
                ("priority".to_string(), score.to_string()),
                ("job".to_string(), job_id.to_string()),
            ]);

            match self
                .frontier
                .admit(link, score, Some(&child_metadata), false)
                .await
            {
                Ok(true) => admitted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(url = %link, error = %e, "Failed to admit discovered link");
                    break;
                }
            }
        }

        if admitted > 0 {
            metrics::counter!("scheduler.links_admitted").increment(admitted);
            tracing::debug!(url = %url, admitted = admitted, "Expanded outbound links");
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
        tracing::info!("Scheduler pause requested");
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
        tracing::info!("Scheduler resume requested");
    }

    /// Signal the run loop to stop; `run` returns after in-flight workers
    /// complete.
    pub fn stop(&self) {
        self.stop.send_replace(true);
        tracing::info!("Scheduler stop requested");
    }

    pub fn state(&self) -> SchedulerState {
        self.stats.lock().unwrap().state
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats.lock().unwrap().clone();
        stats.active_workers =
            (self.config.max_workers - self.worker_permits.available_permits()) as u64;
        stats
    }

    pub fn host_registry(&self) -> Arc<HostRegistry> {
        Arc::clone(&self.hosts)
    }

    fn set_state(&self, state: SchedulerState) {
        self.stats.lock().unwrap().state = state;
    }

    fn log_stats(&self) {
        let stats = self.stats();
        tracing::info!(
            scheduled = stats.urls_scheduled,
            completed = stats.urls_completed,
            failed = stats.urls_failed,
            active_workers = stats.active_workers,
            rps = stats.requests_per_second,
            bytes = stats.total_bytes_downloaded,
            backpressure_events = stats.backpressure_events,
            "Scheduler stats"
        );
    }
}

fn job_of(metadata: &HashMap<String, String>) -> Option<JobId> {
    metadata.get("job").and_then(|value| JobId::parse(value))
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}
