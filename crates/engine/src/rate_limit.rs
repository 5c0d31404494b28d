use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Sliding-window rate limiter on the monotonic clock.
///
/// Entries older than the window are pruned lazily on each check; `acquire`
/// sleeps just long enough for the oldest entry to leave the window.
pub struct SlidingWindow {
    capacity: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until a slot is free in the window, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                Self::prune(&mut timestamps, now, self.window);

                if timestamps.len() < self.capacity {
                    timestamps.push_back(now);
                    return;
                }

                // Minimal sleep: until the oldest entry falls out.
                let oldest = *timestamps.front().expect("window is at capacity");
                self.window.saturating_sub(now.duration_since(oldest))
            };

            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Number of claims currently inside the window.
    pub async fn current_count(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        Self::prune(&mut timestamps, Instant::now(), self.window);
        timestamps.len()
    }

    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-host sliding windows, lazily created.
pub struct HostRateLimiter {
    capacity: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl HostRateLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Block until the host's window has a free slot, then claim it.
    pub async fn acquire(&self, host: &str) {
        loop {
            let wait = {
                let mut windows = self.windows.lock().await;
                let timestamps = windows.entry(host.to_string()).or_default();
                let now = Instant::now();
                SlidingWindow::prune(timestamps, now, self.window);

                if timestamps.len() < self.capacity {
                    timestamps.push_back(now);
                    return;
                }

                let oldest = *timestamps.front().expect("window is at capacity");
                self.window.saturating_sub(now.duration_since(oldest))
            };

            tracing::debug!(host = %host, wait_ms = wait.as_millis() as u64, "Per-host rate limit hit");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_window_admits_up_to_capacity_immediately() {
        let limiter = SlidingWindow::new(5, Duration::from_secs(1));
        let started = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.current_count().await, 5);
    }

    #[tokio::test]
    async fn test_window_blocks_at_capacity() {
        let limiter = SlidingWindow::new(2, Duration::from_millis(200));
        limiter.acquire().await;
        limiter.acquire().await;

        let started = Instant::now();
        limiter.acquire().await;
        // The third claim had to wait for the first to expire.
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_window_count_decays() {
        let limiter = SlidingWindow::new(10, Duration::from_millis(100));
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.current_count().await, 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(limiter.current_count().await, 0);
    }

    #[tokio::test]
    async fn test_host_windows_are_independent() {
        let limiter = HostRateLimiter::new(1, Duration::from_millis(200));
        limiter.acquire("a.test").await;

        // A different host is not blocked by a.test's full window.
        let started = Instant::now();
        limiter.acquire("b.test").await;
        assert!(started.elapsed() < Duration::from_millis(50));

        // The same host is.
        let started = Instant::now();
        limiter.acquire("a.test").await;
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
