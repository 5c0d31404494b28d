mod host;
mod job;
mod scrape;
mod stats;

pub use host::HostState;
pub use job::{AdmitReport, JobSnapshot, JobSpec, JobStatus};
pub use scrape::{ScrapeOutcome, ScrapeResult};
pub use stats::{FrontierStats, SchedulerState, SchedulerStats};
