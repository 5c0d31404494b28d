use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// State of a per-host circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation — requests pass through.
    Closed,
    /// Breaker tripped — requests are rejected until the recovery window passes.
    Open,
    /// Recovery window elapsed — a bounded number of concurrent probes allowed.
    HalfOpen,
}

/// Circuit breaker for one host.
///
/// Closed → Open on `failure_threshold` consecutive failures; Open → HalfOpen
/// once `recovery_timeout` elapses; HalfOpen admits at most
/// `half_open_max_probes` concurrent probes, closing on the first success and
/// reopening on any failure.
pub struct CircuitBreaker {
    host: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_probes: u32,
    /// Guards all transition state. Uses std::sync::Mutex because it is
    /// never held across await points.
    inner: Mutex<CircuitInner>,
}

struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
    last_transition: Instant,
}

impl CircuitBreaker {
    pub fn new(
        host: &str,
        failure_threshold: u32,
        recovery_timeout: Duration,
        half_open_max_probes: u32,
    ) -> Self {
        Self {
            host: host.to_string(),
            failure_threshold,
            recovery_timeout,
            half_open_max_probes,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_in_flight: 0,
                last_transition: Instant::now(),
            }),
        }
    }

    /// Whether a request may go out now. A true return in HalfOpen claims
    /// one probe slot; the caller must settle it with `record_success`,
    /// `record_failure`, or `release_probe`.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_in_flight = 1;
                    inner.last_transition = Instant::now();
                    tracing::info!(
                        host = %self.host,
                        "Circuit breaker transitioning to half-open"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.half_open_max_probes {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful request — close the circuit, reset counters.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);

        if inner.state != CircuitState::Closed {
            tracing::info!(
                host = %self.host,
                previous_state = ?inner.state,
                "Circuit breaker closing after success"
            );
            inner.state = CircuitState::Closed;
            inner.half_open_in_flight = 0;
            inner.last_transition = Instant::now();
            metrics::counter!("fetcher.breaker.recoveries", "host" => self.host.clone())
                .increment(1);
        }
    }

    /// Record a failed request — count toward the threshold, reopen from
    /// half-open.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open && inner.state != CircuitState::Open {
            tracing::warn!(
                host = %self.host,
                failures = inner.consecutive_failures,
                threshold = self.failure_threshold,
                "Circuit breaker OPEN"
            );
            inner.state = CircuitState::Open;
            inner.half_open_in_flight = 0;
            inner.last_transition = Instant::now();
            metrics::counter!("fetcher.breaker.trips", "host" => self.host.clone()).increment(1);
        }
    }

    /// Release a claimed probe slot without recording an outcome. Used for
    /// results that are neither a breaker success nor a breaker failure
    /// (rate limiting, extraction errors).
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
    }

    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    fn idle_for(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        let since_failure = inner
            .last_failure
            .map(|at| at.elapsed())
            .unwrap_or_else(|| inner.last_transition.elapsed());
        since_failure.min(inner.last_transition.elapsed())
    }

    fn is_quiet(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.state == CircuitState::Closed && inner.consecutive_failures == 0
    }
}

/// Lazily populated registry of per-host breakers.
pub struct BreakerRegistry {
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_probes: u32,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(
        failure_threshold: u32,
        recovery_timeout: Duration,
        half_open_max_probes: u32,
    ) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            half_open_max_probes,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a host.
    pub fn breaker_for(&self, host: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        Arc::clone(breakers.entry(host.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                host,
                self.failure_threshold,
                self.recovery_timeout,
                self.half_open_max_probes,
            ))
        }))
    }

    /// Drop closed, quiet breakers that have been idle longer than
    /// `max_idle`. Keeps the registry from growing with every host ever
    /// crawled.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut breakers = self.breakers.lock().unwrap();
        let before = breakers.len();
        breakers.retain(|_, breaker| !(breaker.is_quiet() && breaker.idle_for() >= max_idle));
        let removed = before - breakers.len();
        if removed > 0 {
            tracing::debug!(removed = removed, "Swept idle circuit breakers");
        }
        removed
    }

    /// (host, state) snapshot for observability.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let breakers = self.breakers.lock().unwrap();
        breakers
            .iter()
            .map(|(host, breaker)| (host.clone(), breaker.current_state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery: Duration, probes: u32) -> CircuitBreaker {
        CircuitBreaker::new("e.test", threshold, recovery, probes)
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let breaker = breaker(5, Duration::from_secs(60), 3);

        for _ in 0..4 {
            assert!(breaker.allow());
            breaker.record_failure();
            assert_eq!(breaker.current_state(), CircuitState::Closed);
        }

        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let breaker = breaker(3, Duration::from_secs(60), 3);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_recovery_and_close_on_success() {
        let breaker = breaker(1, Duration::from_millis(20), 3);

        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert!(!breaker.allow());

        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow());
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = breaker(1, Duration::from_millis(20), 3);

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow());

        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_half_open_caps_concurrent_probes() {
        let breaker = breaker(1, Duration::from_millis(10), 2);

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        assert!(breaker.allow());
        assert!(breaker.allow());
        assert!(!breaker.allow(), "third concurrent probe must be rejected");

        // Settling one probe neutrally frees its slot.
        breaker.release_probe();
        assert!(breaker.allow());
    }

    #[test]
    fn test_registry_sweeps_only_quiet_breakers() {
        let registry = BreakerRegistry::new(5, Duration::from_secs(60), 3);

        registry.breaker_for("quiet.test");
        let failing = registry.breaker_for("failing.test");
        failing.record_failure();

        std::thread::sleep(Duration::from_millis(20));
        let removed = registry.sweep_idle(Duration::from_millis(10));
        assert_eq!(removed, 1);

        let remaining: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|(host, _)| host)
            .collect();
        assert_eq!(remaining, vec!["failing.test".to_string()]);
    }
}
