use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use regex::Regex;

use trawler_common::types::{JobSnapshot, JobSpec, JobStatus};
use trawler_common::urls;
use trawler_common::{JobId, Result, TrawlerError};
use trawler_frontier::UrlFrontier;

use crate::scheduler::CrawlScheduler;

/// Per-job admission policy applied during link expansion.
#[derive(Clone, Debug, Default)]
pub struct LinkPolicy {
    pub max_pages: Option<u64>,
    pub max_depth: Option<u32>,
    pub include: Vec<Regex>,
    pub exclude: Vec<Regex>,
}

impl LinkPolicy {
    pub fn compile(spec: &JobSpec) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|e| {
                        TrawlerError::Validation(format!("Bad URL pattern {:?}: {}", pattern, e))
                    })
                })
                .collect()
        };

        Ok(Self {
            max_pages: spec.max_pages,
            max_depth: spec.max_depth,
            include: compile(&spec.include_patterns)?,
            exclude: compile(&spec.exclude_patterns)?,
        })
    }

    /// A URL passes when no exclude pattern matches and, if include
    /// patterns exist, at least one matches.
    pub fn allows(&self, url: &str) -> bool {
        if self.exclude.iter().any(|pattern| pattern.is_match(url)) {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.iter().any(|pattern| pattern.is_match(url))
    }
}

struct JobEntry {
    snapshot: JobSnapshot,
    policy: LinkPolicy,
}

/// Shared job bookkeeping, read by scheduler workers and mutated by the
/// control plane.
#[derive(Default)]
pub struct JobTable {
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl JobTable {
    pub fn policy_for(&self, id: JobId) -> Option<LinkPolicy> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&id).map(|entry| entry.policy.clone())
    }

    pub fn snapshot_of(&self, id: JobId) -> Option<JobSnapshot> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&id).map(|entry| entry.snapshot.clone())
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.lock().unwrap();
        let mut snapshots: Vec<JobSnapshot> =
            jobs.values().map(|entry| entry.snapshot.clone()).collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    /// Record one crawled page against a job. Returns false when the job
    /// has reached its page budget, which stops further link expansion.
    pub fn record_crawled(&self, id: JobId, ok: bool) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(entry) = jobs.get_mut(&id) else {
            return false;
        };
        if ok {
            entry.snapshot.pages_crawled += 1;
        } else {
            entry.snapshot.pages_failed += 1;
        }
        entry
            .policy
            .max_pages
            .is_none_or(|max| entry.snapshot.pages_crawled < max)
    }

    /// Whether a job is still expanding links.
    pub fn is_active(&self, id: JobId) -> bool {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&id)
            .map(|entry| entry.snapshot.status == JobStatus::Running)
            .unwrap_or(false)
    }

    fn insert(&self, snapshot: JobSnapshot, policy: LinkPolicy) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(snapshot.id, JobEntry { snapshot, policy });
    }

    fn set_status(&self, id: JobId, status: JobStatus) -> Option<JobStatus> {
        let mut jobs = self.jobs.lock().unwrap();
        let entry = jobs.get_mut(&id)?;
        if entry.snapshot.status.is_terminal() {
            return Some(entry.snapshot.status);
        }
        entry.snapshot.status = status;
        Some(status)
    }

    fn record_seeds(&self, id: JobId, admitted: u64) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(entry) = jobs.get_mut(&id) {
            entry.snapshot.seeds_admitted = admitted;
        }
    }

    /// Move every non-terminal job to `status`. Used when the scheduler run
    /// ends (completed) or dies on a frontier outage (failed).
    pub fn finish_all(&self, status: JobStatus) {
        let mut jobs = self.jobs.lock().unwrap();
        for entry in jobs.values_mut() {
            if !entry.snapshot.status.is_terminal() {
                entry.snapshot.status = status;
            }
        }
    }

    fn any_running(&self) -> bool {
        let jobs = self.jobs.lock().unwrap();
        jobs.values()
            .any(|entry| entry.snapshot.status == JobStatus::Running)
    }
}

/// Control plane for crawl jobs: creation, seed admission, lifecycle.
pub struct JobManager {
    frontier: Arc<UrlFrontier>,
    scheduler: Arc<CrawlScheduler>,
    table: Arc<JobTable>,
    run_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl JobManager {
    pub fn new(
        frontier: Arc<UrlFrontier>,
        scheduler: Arc<CrawlScheduler>,
        table: Arc<JobTable>,
    ) -> Self {
        Self {
            frontier,
            scheduler,
            table,
            run_handle: Mutex::new(None),
        }
    }

    pub fn table(&self) -> Arc<JobTable> {
        Arc::clone(&self.table)
    }

    /// Create a job, admit its seeds, and make sure the scheduler is
    /// running.
    pub async fn start_job(&self, spec: JobSpec) -> Result<JobSnapshot> {
        if spec.seeds.is_empty() {
            return Err(TrawlerError::Validation("Job has no seeds".to_string()));
        }
        let policy = LinkPolicy::compile(&spec)?;

        let id = JobId::new();
        let snapshot = JobSnapshot {
            id,
            name: spec.name.clone(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            seeds_admitted: 0,
            pages_crawled: 0,
            pages_failed: 0,
        };
        self.table.insert(snapshot, policy);

        let mut admitted = 0;
        for seed in &spec.seeds {
            let repaired = urls::ensure_scheme(seed);
            if !urls::is_valid_crawl_url(&repaired) {
                tracing::warn!(job_id = %id, url = %seed, "Invalid seed URL");
                continue;
            }

            let metadata = HashMap::from([
                ("seed".to_string(), "true".to_string()),
                ("depth".to_string(), "0".to_string()),
                ("priority".to_string(), spec.priority.to_string()),
                ("job".to_string(), id.to_string()),
            ]);
            let metadata = match &spec.category {
                Some(category) => {
                    let mut metadata = metadata;
                    metadata.insert("category".to_string(), category.clone());
                    metadata
                }
                None => metadata,
            };

            match self
                .frontier
                .admit(&repaired, spec.priority, Some(&metadata), false)
                .await
            {
                Ok(true) => admitted += 1,
                Ok(false) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.table.record_seeds(id, admitted);
        self.table.set_status(id, JobStatus::Running);

        self.ensure_scheduler_running();

        tracing::info!(job_id = %id, name = %spec.name, seeds = admitted, "Job started");
        let snapshot = self
            .table
            .snapshot_of(id)
            .ok_or_else(|| TrawlerError::Internal("Job vanished during start".to_string()))?;
        Ok(snapshot)
    }

    /// Spawn the scheduler run loop unless one is already active.
    fn ensure_scheduler_running(&self) {
        let mut handle = self.run_handle.lock().unwrap();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let scheduler = Arc::clone(&self.scheduler);
        let table = Arc::clone(&self.table);
        *handle = Some(tokio::spawn(async move {
            match scheduler.run().await {
                Ok(()) => table.finish_all(JobStatus::Completed),
                Err(e) => {
                    tracing::error!(error = %e, "Scheduler run failed");
                    table.finish_all(JobStatus::Failed);
                }
            }
        }));
    }

    /// Pausing any job pauses the crawl — one scheduler drives all jobs.
    pub async fn pause_job(&self, id: JobId) -> Result<JobStatus> {
        let status = self
            .table
            .set_status(id, JobStatus::Paused)
            .ok_or_else(|| TrawlerError::NotFound(format!("job {}", id)))?;
        self.scheduler.pause();
        Ok(status)
    }

    pub async fn resume_job(&self, id: JobId) -> Result<JobStatus> {
        let status = self
            .table
            .set_status(id, JobStatus::Running)
            .ok_or_else(|| TrawlerError::NotFound(format!("job {}", id)))?;
        self.scheduler.resume();
        self.ensure_scheduler_running();
        Ok(status)
    }

    /// Cancel a job. The scheduler stops once no running job remains.
    pub async fn stop_job(&self, id: JobId) -> Result<JobStatus> {
        let status = self
            .table
            .set_status(id, JobStatus::Cancelled)
            .ok_or_else(|| TrawlerError::NotFound(format!("job {}", id)))?;

        if !self.table.any_running() {
            self.scheduler.stop();
        }
        Ok(status)
    }

    pub fn job(&self, id: JobId) -> Option<JobSnapshot> {
        self.table.snapshot_of(id)
    }

    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.table.snapshots()
    }
}
