use serde::{Deserialize, Serialize};

/// Top-level crawl configuration, deserialized from trawler.toml.
///
/// Every tunable has an explicit default; unknown keys are rejected so a
/// typo in the config file is a boot failure, not a silently ignored option.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    pub frontier: FrontierConfig,
    pub scheduler: SchedulerConfig,
    pub fetcher: FetcherConfig,
}

/// Frontier politeness and dedup sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrontierConfig {
    /// Prefix for all coordination-store keys.
    pub key_prefix: String,
    /// Delay between requests to a host with no recorded delay, in seconds.
    pub default_delay: f64,
    /// Lower clamp for per-host delays, in seconds.
    pub min_delay: f64,
    /// Upper clamp for per-host delays, in seconds.
    pub max_delay: f64,
    /// α in the adaptive-politeness formula delay = α × response_time.
    pub politeness_factor: f64,
    /// Expected number of URLs the Bloom filter must hold.
    pub expected_items: u64,
    /// Target Bloom false-positive rate.
    pub false_positive_rate: f64,
    /// TTL for per-URL metadata hashes, in seconds.
    pub metadata_ttl_seconds: u64,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            key_prefix: "frontier".to_string(),
            default_delay: 1.0,
            min_delay: 0.5,
            max_delay: 30.0,
            politeness_factor: 10.0,
            expected_items: 10_000_000,
            false_positive_rate: 0.01,
            metadata_ttl_seconds: 86_400 * 7,
        }
    }
}

/// Scheduler throughput shape and backpressure.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Cap on concurrently running worker tasks.
    pub max_workers: usize,
    /// Global request budget per sliding 1-second window.
    pub max_requests_per_second: f64,
    /// Per-host request budget per sliding 60-second window.
    pub max_requests_per_host_per_minute: u32,
    /// Queue depth above which the scheduler stops admitting work.
    pub queue_high_watermark: u64,
    /// Queue depth below which normal flow resumes.
    pub queue_low_watermark: u64,
    /// Sleep while backpressure is active, in seconds.
    pub backpressure_delay_seconds: f64,
    /// Wall-clock budget for one worker's fetch, in seconds.
    pub url_fetch_timeout_seconds: f64,
    /// Continuous idle time after which the run ends, in seconds.
    pub idle_timeout_seconds: f64,
    /// Interval between stats log lines, in seconds.
    pub stats_interval_seconds: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 50,
            max_requests_per_second: 100.0,
            max_requests_per_host_per_minute: 60,
            queue_high_watermark: 10_000,
            queue_low_watermark: 1_000,
            backpressure_delay_seconds: 5.0,
            url_fetch_timeout_seconds: 30.0,
            idle_timeout_seconds: 60.0,
            stats_interval_seconds: 10.0,
        }
    }
}

/// Per-URL fetch behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetcherConfig {
    /// Global concurrent-request cap.
    pub max_concurrent_requests: usize,
    /// Concurrent-request cap per host.
    pub max_concurrent_per_host: usize,
    pub connect_timeout_seconds: f64,
    pub read_timeout_seconds: f64,
    pub total_timeout_seconds: f64,
    /// Retries after the first attempt; a fetch issues at most
    /// `max_retries + 1` requests.
    pub max_retries: u32,
    /// Minimum retry sleep, in seconds.
    pub retry_base_seconds: f64,
    /// Maximum retry sleep, in seconds.
    pub retry_cap_seconds: f64,
    /// Consecutive failures before a host's circuit opens.
    pub breaker_failure_threshold: u32,
    /// Time an open circuit waits before allowing probes, in seconds.
    pub breaker_recovery_seconds: f64,
    /// Concurrent probe cap while a circuit is half-open.
    pub half_open_max_probes: u32,
    /// User-Agent pool, rotated per request.
    pub user_agents: Vec<String>,
    /// Proxy endpoints; empty disables proxy rotation.
    pub proxies: Vec<String>,
    /// Consecutive failures before a proxy is disabled.
    pub proxy_max_failures: u32,
    /// Extracted text shorter than this is an extraction error.
    pub min_content_length: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 50,
            max_concurrent_per_host: 5,
            connect_timeout_seconds: 5.0,
            read_timeout_seconds: 30.0,
            total_timeout_seconds: 60.0,
            max_retries: 3,
            retry_base_seconds: 1.0,
            retry_cap_seconds: 60.0,
            breaker_failure_threshold: 5,
            breaker_recovery_seconds: 60.0,
            half_open_max_probes: 3,
            user_agents: default_user_agents(),
            proxies: Vec::new(),
            proxy_max_failures: 3,
            min_content_length: 100,
        }
    }
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/120.0.0.0 Safari/537.36",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
