use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use md5::Md5;
use sha2::Digest;

use trawler_common::config::FrontierConfig;
use trawler_common::types::FrontierStats;
use trawler_common::urls;

use crate::bloom::{BloomConfig, BloomFilter};
use crate::store::{CoordinationStore, StoreError};

/// How many priority-queue candidates one `next` scan inspects.
const SCAN_WIDTH: isize = 100;
/// Sleep between scans while waiting for a host delay to elapse.
const SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// Distributed URL frontier.
///
/// Composes a priority queue (sorted set, score = −priority), one FIFO list
/// per host, per-host politeness clocks, and the Bloom deduplicator — all in
/// the coordination store, so any number of scheduler processes can share
/// one crawl.
pub struct UrlFrontier {
    store: CoordinationStore,
    bloom: BloomFilter,
    config: FrontierConfig,
    priority_queue_key: String,
    domain_queues_prefix: String,
    crawl_times_key: String,
    domain_delays_key: String,
    active_domains_key: String,
    stats_key: String,
    metadata_prefix: String,
}

impl UrlFrontier {
    pub fn new(store: CoordinationStore, config: FrontierConfig) -> Self {
        let prefix = config.key_prefix.clone();
        let bloom = BloomFilter::new(
            &format!("{}:bloom", prefix),
            BloomConfig {
                expected_items: config.expected_items,
                false_positive_rate: config.false_positive_rate,
            },
        );

        Self {
            store,
            bloom,
            config,
            priority_queue_key: format!("{}:priority_queue", prefix),
            domain_queues_prefix: format!("{}:domain_queues", prefix),
            crawl_times_key: format!("{}:crawl_times", prefix),
            domain_delays_key: format!("{}:domain_delays", prefix),
            active_domains_key: format!("{}:active_domains", prefix),
            stats_key: format!("{}:stats", prefix),
            metadata_prefix: format!("{}:metadata", prefix),
        }
    }

    pub async fn health_check(&self) -> Result<(), FrontierError> {
        Ok(self.store.health_check().await?)
    }

    fn domain_queue_key(&self, host: &str) -> String {
        format!("{}:{}", self.domain_queues_prefix, host)
    }

    fn metadata_key(&self, normalized_url: &str) -> String {
        let digest = Md5::digest(normalized_url.as_bytes());
        format!("{}:{}", self.metadata_prefix, hex::encode(digest))
    }

    /// Admit a URL.
    ///
    /// Returns true when the URL was enqueued, false when it was dropped as
    /// a duplicate. `force` skips the dedup check (used for re-admits after
    /// 429 or a blocked host) without re-inserting into the Bloom filter;
    /// metadata and its TTL are refreshed either way.
    pub async fn admit(
        &self,
        url: &str,
        priority: f64,
        metadata: Option<&HashMap<String, String>>,
        force: bool,
    ) -> Result<bool, FrontierError> {
        let normalized = urls::normalize(url).map_err(|e| FrontierError::InvalidUrl(e.to_string()))?;
        let host = urls::host_of(&normalized)
            .ok_or_else(|| FrontierError::InvalidUrl(format!("no host in {}", normalized)))?;

        if !force {
            if self.bloom.contains(&self.store, &normalized).await? {
                let _: i64 = self
                    .store
                    .query(
                        redis::cmd("HINCRBY")
                            .arg(&self.stats_key)
                            .arg("duplicates_skipped")
                            .arg(1),
                    )
                    .await?;
                metrics::counter!("frontier.duplicates_skipped").increment(1);
                tracing::debug!(url = %normalized, "Duplicate URL skipped");
                return Ok(false);
            }
            // Bloom insert happens before any queue write: a crash in
            // between costs one replayable URL, never a lost one.
            self.bloom.insert(&self.store, &normalized).await?;
        }

        let mut pipe = redis::pipe();
        pipe.cmd("ZADD")
            .arg(&self.priority_queue_key)
            .arg(-priority)
            .arg(&normalized);
        pipe.cmd("RPUSH")
            .arg(&self.domain_queue_key(&host))
            .arg(&normalized);
        pipe.cmd("SADD").arg(&self.active_domains_key).arg(&host);
        pipe.cmd("HINCRBY").arg(&self.stats_key).arg("urls_added").arg(1);

        if let Some(metadata) = metadata {
            if !metadata.is_empty() {
                let metadata_key = self.metadata_key(&normalized);
                let mut hset = redis::cmd("HSET");
                hset.arg(&metadata_key);
                for (field, value) in metadata {
                    hset.arg(field).arg(value);
                }
                pipe.add_command(hset);
                pipe.cmd("EXPIRE")
                    .arg(&metadata_key)
                    .arg(self.config.metadata_ttl_seconds);
            }
        }

        let _: redis::Value = self.store.query_pipeline(&pipe).await?;

        metrics::counter!("frontier.urls_admitted").increment(1);
        tracing::debug!(url = %normalized, priority = priority, "URL admitted");
        Ok(true)
    }

    /// Admit a batch at one priority. Returns how many were enqueued.
    pub async fn admit_many(&self, raw_urls: &[String], priority: f64) -> Result<u64, FrontierError> {
        let mut added = 0;
        for url in raw_urls {
            if self.admit(url, priority, None, false).await? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Hand out the next URL whose host has satisfied its politeness delay.
    ///
    /// Scans up to 100 highest-priority candidates, skipping hosts already
    /// inspected this pass. The winning URL is removed from the priority
    /// queue first (losing a ZREM race means another scheduler took it), and
    /// the host's clock is stamped before this returns, so two workers can
    /// never both pass the delay check.
    pub async fn next(&self, timeout: Duration) -> Result<Option<String>, FrontierError> {
        let deadline = Instant::now() + timeout;
        let mut checked_hosts: HashSet<String> = HashSet::new();

        loop {
            let candidates: Vec<String> = self
                .store
                .query(
                    redis::cmd("ZRANGE")
                        .arg(&self.priority_queue_key)
                        .arg(0)
                        .arg(SCAN_WIDTH - 1),
                )
                .await?;

            for url in &candidates {
                let Some(host) = urls::host_of(url) else {
                    // Unparseable member cannot be dispatched; drop it.
                    let _: i64 = self
                        .store
                        .query(redis::cmd("ZREM").arg(&self.priority_queue_key).arg(url))
                        .await?;
                    continue;
                };

                if !checked_hosts.insert(host.clone()) {
                    continue;
                }

                if !self.host_ready(&host).await? {
                    continue;
                }

                let removed: i64 = self
                    .store
                    .query(redis::cmd("ZREM").arg(&self.priority_queue_key).arg(url))
                    .await?;
                if removed == 0 {
                    continue;
                }

                // Stamp the clock before the caller issues any request.
                let mut pipe = redis::pipe();
                pipe.cmd("LREM")
                    .arg(&self.domain_queue_key(&host))
                    .arg(1)
                    .arg(url);
                pipe.cmd("HSET")
                    .arg(&self.crawl_times_key)
                    .arg(&host)
                    .arg(unix_now());
                pipe.cmd("LLEN").arg(&self.domain_queue_key(&host));
                let replies: Vec<i64> = self.store.query_pipeline(&pipe).await?;

                if replies.get(2) == Some(&0) {
                    let _: i64 = self
                        .store
                        .query(redis::cmd("SREM").arg(&self.active_domains_key).arg(&host))
                        .await?;
                }

                metrics::counter!("frontier.urls_dispatched").increment(1);
                tracing::debug!(url = %url, host = %host, "URL dispatched");
                return Ok(Some(url.clone()));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(SCAN_INTERVAL).await;
            checked_hosts.clear();
        }
    }

    async fn host_ready(&self, host: &str) -> Result<bool, FrontierError> {
        let last_fetch: Option<f64> = self
            .store
            .query(redis::cmd("HGET").arg(&self.crawl_times_key).arg(host))
            .await?;

        let Some(last_fetch) = last_fetch else {
            return Ok(true);
        };

        let delay = self.delay_of(host).await?;
        Ok(unix_now() - last_fetch >= delay)
    }

    /// Current politeness delay for a host, falling back to the default.
    pub async fn delay_of(&self, host: &str) -> Result<f64, FrontierError> {
        let delay: Option<f64> = self
            .store
            .query(redis::cmd("HGET").arg(&self.domain_delays_key).arg(host))
            .await?;
        Ok(delay.unwrap_or(self.config.default_delay))
    }

    /// Persist a per-host delay, clamped to [min_delay, max_delay].
    pub async fn set_delay(&self, host: &str, delay_seconds: f64) -> Result<f64, FrontierError> {
        let clamped = delay_seconds.clamp(self.config.min_delay, self.config.max_delay);
        let _: i64 = self
            .store
            .query(
                redis::cmd("HSET")
                    .arg(&self.domain_delays_key)
                    .arg(host)
                    .arg(clamped),
            )
            .await?;
        Ok(clamped)
    }

    /// Adaptive politeness: delay = α × observed response time, clamped.
    pub async fn update_delay_from_response(
        &self,
        host: &str,
        response_time_seconds: f64,
    ) -> Result<f64, FrontierError> {
        let delay = self
            .set_delay(host, self.config.politeness_factor * response_time_seconds)
            .await?;
        tracing::debug!(host = %host, delay = delay, "Updated adaptive delay");
        Ok(delay)
    }

    /// Record a crawl completion in the shared stats hash.
    pub async fn mark_crawled(&self, _url: &str, success: bool) -> Result<(), FrontierError> {
        let field = if success {
            "successful_crawls"
        } else {
            "failed_crawls"
        };
        let _: i64 = self
            .store
            .query(redis::cmd("HINCRBY").arg(&self.stats_key).arg(field).arg(1))
            .await?;
        Ok(())
    }

    /// Number of URLs waiting in the priority queue.
    pub async fn queue_depth(&self) -> Result<u64, FrontierError> {
        Ok(self
            .store
            .query(redis::cmd("ZCARD").arg(&self.priority_queue_key))
            .await?)
    }

    /// Hosts that currently have at least one enqueued URL.
    pub async fn active_hosts(&self) -> Result<Vec<String>, FrontierError> {
        Ok(self
            .store
            .query(redis::cmd("SMEMBERS").arg(&self.active_domains_key))
            .await?)
    }

    pub async fn host_queue_depth(&self, host: &str) -> Result<u64, FrontierError> {
        Ok(self
            .store
            .query(redis::cmd("LLEN").arg(&self.domain_queue_key(host)))
            .await?)
    }

    /// Per-URL metadata written at admit time (depth, parent priority, job).
    pub async fn metadata_of(
        &self,
        url: &str,
    ) -> Result<HashMap<String, String>, FrontierError> {
        let normalized = urls::normalize(url).map_err(|e| FrontierError::InvalidUrl(e.to_string()))?;
        Ok(self
            .store
            .query(redis::cmd("HGETALL").arg(&self.metadata_key(&normalized)))
            .await?)
    }

    /// Aggregate frontier counters plus Bloom estimates.
    pub async fn stats(&self) -> Result<FrontierStats, FrontierError> {
        let mut pipe = redis::pipe();
        pipe.cmd("ZCARD").arg(&self.priority_queue_key);
        pipe.cmd("SCARD").arg(&self.active_domains_key);
        let (queue_depth, active_hosts): (u64, u64) = self.store.query_pipeline(&pipe).await?;

        let counters: HashMap<String, u64> = self
            .store
            .query(redis::cmd("HGETALL").arg(&self.stats_key))
            .await?;

        let estimated_unique_urls = self.bloom.approximate_count(&self.store).await?;

        Ok(FrontierStats {
            queue_depth,
            active_hosts,
            urls_added: counters.get("urls_added").copied().unwrap_or(0),
            urls_crawled: counters.get("successful_crawls").copied().unwrap_or(0),
            urls_failed: counters.get("failed_crawls").copied().unwrap_or(0),
            duplicates_skipped: counters.get("duplicates_skipped").copied().unwrap_or(0),
            bloom_filter_bits: self.bloom.bits(),
            estimated_unique_urls,
        })
    }

    /// Destructive operator action: delete every key under the prefix,
    /// including the Bloom filter.
    pub async fn clear(&self) -> Result<(), FrontierError> {
        let pattern = format!("{}:*", self.config.key_prefix);
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .store
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(500),
                )
                .await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                for key in &keys {
                    del.arg(key);
                }
                let _: i64 = self.store.query(&del).await?;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        tracing::info!(prefix = %self.config.key_prefix, "Frontier cleared");
        Ok(())
    }
}

/// Wall-clock seconds; the politeness clock must be shared across processes,
/// so it lives on the store's timeline rather than a process-local monotonic
/// clock.
fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}

#[derive(Debug, thiserror::Error)]
pub enum FrontierError {
    #[error("Frontier unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<StoreError> for FrontierError {
    fn from(e: StoreError) -> Self {
        // Anything that escapes the store's bounded retries is persistent
        // from the frontier's point of view.
        FrontierError::Unavailable(e.to_string())
    }
}

impl From<FrontierError> for trawler_common::TrawlerError {
    fn from(e: FrontierError) -> Self {
        match e {
            FrontierError::Unavailable(msg) => {
                trawler_common::TrawlerError::FrontierUnavailable(msg)
            }
            FrontierError::InvalidUrl(msg) => trawler_common::TrawlerError::InvalidUrl(msg),
        }
    }
}
