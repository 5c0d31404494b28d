use serde::{Deserialize, Serialize};

/// Per-host crawl bookkeeping maintained by the scheduler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostState {
    pub host: String,
    /// Current politeness delay in seconds, mirrored from the frontier.
    pub crawl_delay: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_response_time: f64,
    pub last_status_code: u16,
    pub consecutive_errors: u32,
    pub is_blocked: bool,
    /// Unix seconds after which a blocked host may be crawled again.
    pub blocked_until: Option<f64>,
}

impl HostState {
    pub fn new(host: impl Into<String>, default_delay: f64) -> Self {
        Self {
            host: host.into(),
            crawl_delay: default_delay,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_response_time: 0.0,
            last_status_code: 0,
            consecutive_errors: 0,
            is_blocked: false,
            blocked_until: None,
        }
    }

    pub fn average_response_time(&self) -> f64 {
        if self.successful_requests == 0 {
            0.0
        } else {
            self.total_response_time / self.successful_requests as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_rates_handle_zero_requests() {
        let state = HostState::new("example.com", 1.0);
        assert_eq!(state.average_response_time(), 0.0);
        assert_eq!(state.success_rate(), 0.0);
    }

    #[test]
    fn test_derived_rates() {
        let mut state = HostState::new("example.com", 1.0);
        state.total_requests = 4;
        state.successful_requests = 2;
        state.total_response_time = 1.0;
        assert_eq!(state.average_response_time(), 0.5);
        assert_eq!(state.success_rate(), 0.5);
    }
}
