use std::collections::HashMap;

use tokio::sync::Mutex;

use trawler_common::types::HostState;

/// Lazily populated registry of per-host crawl state.
pub struct HostRegistry {
    default_delay: f64,
    hosts: Mutex<HashMap<String, HostState>>,
}

impl HostRegistry {
    pub fn new(default_delay: f64) -> Self {
        Self {
            default_delay,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Run `update` against the host's state, creating it on first touch.
    pub async fn with_host<R>(
        &self,
        host: &str,
        update: impl FnOnce(&mut HostState) -> R,
    ) -> R {
        let mut hosts = self.hosts.lock().await;
        let state = hosts
            .entry(host.to_string())
            .or_insert_with(|| HostState::new(host, self.default_delay));
        update(state)
    }

    /// Snapshot of the busiest hosts, sorted by request count.
    pub async fn snapshot(&self, limit: usize) -> Vec<HostState> {
        let hosts = self.hosts.lock().await;
        let mut states: Vec<HostState> = hosts.values().cloned().collect();
        states.sort_by(|a, b| b.total_requests.cmp(&a.total_requests));
        states.truncate(limit);
        states
    }

    pub async fn len(&self) -> usize {
        self.hosts.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_created_lazily_and_updated() {
        let registry = HostRegistry::new(1.5);

        let delay = registry
            .with_host("a.test", |state| {
                state.total_requests += 1;
                state.crawl_delay
            })
            .await;
        assert_eq!(delay, 1.5);

        let requests = registry
            .with_host("a.test", |state| {
                state.total_requests += 1;
                state.total_requests
            })
            .await;
        assert_eq!(requests, 2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_sorted_and_limited() {
        let registry = HostRegistry::new(1.0);
        for (host, requests) in [("a.test", 1), ("b.test", 5), ("c.test", 3)] {
            registry
                .with_host(host, |state| state.total_requests = requests)
                .await;
        }

        let snapshot = registry.snapshot(2).await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].host, "b.test");
        assert_eq!(snapshot[1].host, "c.test");
    }
}
