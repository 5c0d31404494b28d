use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::JobId;

/// Crawl job lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Everything needed to start a crawl job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub seeds: Vec<String>,
    #[serde(default)]
    pub max_pages: Option<u64>,
    #[serde(default)]
    pub max_depth: Option<u32>,
    /// Regex patterns a discovered URL must match to be admitted.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Regex patterns that exclude a discovered URL.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Priority assigned to the seed URLs.
    #[serde(default = "default_seed_priority")]
    pub priority: f64,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_seed_priority() -> f64 {
    1000.0
}

/// Snapshot of one job's progress, returned by the control plane.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub seeds_admitted: u64,
    pub pages_crawled: u64,
    pub pages_failed: u64,
}

/// Result of a bulk admit call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct AdmitReport {
    pub added: u64,
    pub duplicates_skipped: u64,
    pub invalid_skipped: u64,
}
