use std::sync::Mutex;

use rand::seq::SliceRandom;

/// Round-robin proxy rotation with failure-driven disabling.
///
/// A proxy is disabled after `max_failures` consecutive failures and skipped
/// until the whole pool is disabled, at which point the disabled set clears —
/// a degraded pool beats no pool.
pub struct ProxyRotator {
    max_failures: u32,
    inner: Mutex<RotatorInner>,
}

struct RotatorInner {
    entries: Vec<ProxyEntry>,
    cursor: usize,
}

struct ProxyEntry {
    endpoint: String,
    failures: u32,
    disabled: bool,
}

/// Stable index into the rotator's proxy list; also indexes the fetcher's
/// per-proxy HTTP clients.
pub type ProxyIndex = usize;

#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyStats {
    pub total: usize,
    pub disabled: usize,
}

impl ProxyRotator {
    pub fn new(endpoints: Vec<String>, max_failures: u32) -> Self {
        Self {
            max_failures,
            inner: Mutex::new(RotatorInner {
                entries: endpoints
                    .into_iter()
                    .map(|endpoint| ProxyEntry {
                        endpoint,
                        failures: 0,
                        disabled: false,
                    })
                    .collect(),
                cursor: 0,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }

    /// Next non-disabled proxy, round-robin. Clears the disabled set first
    /// if every proxy is disabled.
    pub fn next_proxy(&self) -> Option<(ProxyIndex, String)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.is_empty() {
            return None;
        }

        if inner.entries.iter().all(|entry| entry.disabled) {
            tracing::warn!("All proxies disabled; clearing disabled set");
            for entry in &mut inner.entries {
                entry.disabled = false;
                entry.failures = 0;
            }
        }

        let total = inner.entries.len();
        for _ in 0..total {
            let index = inner.cursor % total;
            inner.cursor = inner.cursor.wrapping_add(1);
            if !inner.entries[index].disabled {
                return Some((index, inner.entries[index].endpoint.clone()));
            }
        }
        None
    }

    pub fn report_success(&self, index: ProxyIndex) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(index) {
            entry.failures = 0;
        }
    }

    pub fn report_failure(&self, index: ProxyIndex) {
        let mut inner = self.inner.lock().unwrap();
        let max_failures = self.max_failures;
        if let Some(entry) = inner.entries.get_mut(index) {
            entry.failures += 1;
            if entry.failures >= max_failures && !entry.disabled {
                entry.disabled = true;
                tracing::warn!(proxy = %entry.endpoint, "Proxy disabled after repeated failures");
                metrics::counter!("fetcher.proxy.disabled").increment(1);
            }
        }
    }

    pub fn stats(&self) -> ProxyStats {
        let inner = self.inner.lock().unwrap();
        ProxyStats {
            total: inner.entries.len(),
            disabled: inner.entries.iter().filter(|entry| entry.disabled).count(),
        }
    }
}

/// Rotating User-Agent pool.
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>) -> Self {
        Self { agents }
    }

    /// A random agent from the pool, or a fixed fallback when empty.
    pub fn choose_user_agent(&self) -> &str {
        self.agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or("trawler/0.1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotator() -> ProxyRotator {
        ProxyRotator::new(
            vec![
                "http://proxy-a:8080".to_string(),
                "http://proxy-b:8080".to_string(),
                "http://proxy-c:8080".to_string(),
            ],
            3,
        )
    }

    #[test]
    fn test_round_robin_covers_all_proxies() {
        let rotator = rotator();
        let picks: Vec<ProxyIndex> = (0..6).map(|_| rotator.next_proxy().unwrap().0).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_disabled_proxy_is_skipped() {
        let rotator = rotator();
        for _ in 0..3 {
            rotator.report_failure(1);
        }
        assert_eq!(rotator.stats().disabled, 1);

        let picks: Vec<ProxyIndex> = (0..4).map(|_| rotator.next_proxy().unwrap().0).collect();
        assert!(!picks.contains(&1));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let rotator = rotator();
        rotator.report_failure(0);
        rotator.report_failure(0);
        rotator.report_success(0);
        rotator.report_failure(0);
        assert_eq!(rotator.stats().disabled, 0);
    }

    #[test]
    fn test_all_disabled_clears_set() {
        let rotator = rotator();
        for index in 0..3 {
            for _ in 0..3 {
                rotator.report_failure(index);
            }
        }
        assert_eq!(rotator.stats().disabled, 3);

        assert!(rotator.next_proxy().is_some());
        assert_eq!(rotator.stats().disabled, 0);
    }

    #[test]
    fn test_empty_pool_yields_none() {
        let rotator = ProxyRotator::new(Vec::new(), 3);
        assert!(rotator.is_empty());
        assert!(rotator.next_proxy().is_none());
    }

    #[test]
    fn test_user_agent_pool_fallback() {
        let pool = UserAgentPool::new(Vec::new());
        assert_eq!(pool.choose_user_agent(), "trawler/0.1");

        let pool = UserAgentPool::new(vec!["AgentA".into(), "AgentB".into()]);
        let agent = pool.choose_user_agent();
        assert!(agent == "AgentA" || agent == "AgentB");
    }
}
