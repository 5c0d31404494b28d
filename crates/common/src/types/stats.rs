use serde::{Deserialize, Serialize};

/// Scheduler lifecycle states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

/// Scheduler counters, reset when a run starts. All counters are
/// monotonically non-decreasing within one run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub state: SchedulerState,
    /// Unix seconds when the current run started.
    pub started_at: Option<f64>,
    pub urls_scheduled: u64,
    pub urls_completed: u64,
    pub urls_failed: u64,
    pub active_workers: u64,
    pub total_bytes_downloaded: u64,
    pub requests_per_second: f64,
    pub backpressure_events: u64,
}

/// Frontier counters, combining the coordination store's aggregate hash with
/// Bloom filter estimates.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrontierStats {
    pub queue_depth: u64,
    pub active_hosts: u64,
    pub urls_added: u64,
    pub urls_crawled: u64,
    pub urls_failed: u64,
    pub duplicates_skipped: u64,
    /// Bit-array size of the Bloom filter.
    pub bloom_filter_bits: u64,
    /// Popcount-derived estimate of distinct URLs seen.
    pub estimated_unique_urls: u64,
}
