use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use url::Url;

use trawler_common::config::FetcherConfig;
use trawler_common::types::{ScrapeOutcome, ScrapeResult};
use trawler_common::urls;

use crate::backoff::DecorrelatedJitter;
use crate::breaker::{BreakerRegistry, CircuitState};
use crate::extract::{default_extractors, Extractor};
use crate::proxy::{ProxyRotator, ProxyStats, UserAgentPool};

/// Resilient per-URL fetcher.
///
/// Turns a URL into a `ScrapeResult` with bounded latency: circuit breaking
/// per host, decorrelated-jitter retries, global and per-host concurrency
/// permits, optional proxy rotation, and two-stage content extraction.
/// `fetch` never fails across its interface — every outcome is a value.
pub struct Fetcher {
    config: FetcherConfig,
    direct_client: reqwest::Client,
    /// One prebuilt client per proxy endpoint; reqwest scopes proxies to
    /// the client, so rotation picks a client rather than a request option.
    proxy_clients: Vec<reqwest::Client>,
    proxies: ProxyRotator,
    agents: UserAgentPool,
    breakers: BreakerRegistry,
    global_permits: Arc<Semaphore>,
    /// Lazily created per-host semaphores. std Mutex: guard is dropped
    /// before any await.
    host_permits: Mutex<HashMap<String, Arc<Semaphore>>>,
    extractors: Vec<Box<dyn Extractor>>,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchInitError> {
        let direct_client = build_client(&config, None)?;

        let mut proxy_clients = Vec::with_capacity(config.proxies.len());
        for endpoint in &config.proxies {
            proxy_clients.push(build_client(&config, Some(endpoint))?);
        }

        let proxies = ProxyRotator::new(config.proxies.clone(), config.proxy_max_failures);
        let agents = UserAgentPool::new(config.user_agents.clone());
        let breakers = BreakerRegistry::new(
            config.breaker_failure_threshold,
            Duration::from_secs_f64(config.breaker_recovery_seconds),
            config.half_open_max_probes,
        );
        let global_permits = Arc::new(Semaphore::new(config.max_concurrent_requests));

        tracing::info!(
            max_concurrent = config.max_concurrent_requests,
            per_host = config.max_concurrent_per_host,
            proxies = config.proxies.len(),
            "Fetcher initialized"
        );

        Ok(Self {
            config,
            direct_client,
            proxy_clients,
            proxies,
            agents,
            breakers,
            global_permits,
            host_permits: Mutex::new(HashMap::new()),
            extractors: default_extractors(),
        })
    }

    /// Fetch one URL and extract its content.
    pub async fn fetch(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> ScrapeResult {
        let Some(host) = urls::host_of(url) else {
            return ScrapeResult::failure(url, ScrapeOutcome::UnknownError, "URL has no host");
        };

        let breaker = self.breakers.breaker_for(&host);
        let mut backoff = DecorrelatedJitter::new(
            Duration::from_secs_f64(self.config.retry_base_seconds),
            Duration::from_secs_f64(self.config.retry_cap_seconds),
        );
        let mut result = ScrapeResult::new(url, ScrapeOutcome::UnknownError);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = backoff.next_delay();
                metrics::counter!("fetcher.retries").increment(1);
                tracing::debug!(
                    url = %url,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying fetch"
                );
                tokio::time::sleep(delay).await;
            }

            if !breaker.allow() {
                let mut rejected = ScrapeResult::failure(
                    url,
                    ScrapeOutcome::CircuitOpen,
                    format!("Circuit breaker open for {}", host),
                );
                rejected.retry_count = attempt;
                metrics::counter!("fetcher.outcome", "outcome" => "circuit_open").increment(1);
                return rejected;
            }

            // Global permit first, then the host permit; both are released
            // when this attempt's scope ends, so backoff sleeps never hold
            // capacity.
            let Ok(_global_permit) = Arc::clone(&self.global_permits).acquire_owned().await else {
                breaker.release_probe();
                return ScrapeResult::failure(url, ScrapeOutcome::UnknownError, "Fetcher closed");
            };
            let host_semaphore = self.host_semaphore(&host);
            let Ok(_host_permit) = host_semaphore.acquire_owned().await else {
                breaker.release_probe();
                return ScrapeResult::failure(url, ScrapeOutcome::UnknownError, "Fetcher closed");
            };

            result = self.attempt(url, &host, headers).await;
            result.retry_count = attempt;

            match result.outcome {
                ScrapeOutcome::Success => {
                    breaker.record_success();
                    break;
                }
                // Not a breaker failure; worth retrying after backoff.
                ScrapeOutcome::RateLimited => {
                    breaker.release_probe();
                }
                // Terminal and not a breaker failure.
                ScrapeOutcome::ExtractionError => {
                    breaker.release_probe();
                    break;
                }
                // Terminal breaker failures.
                ScrapeOutcome::Blocked => {
                    breaker.record_failure();
                    break;
                }
                ScrapeOutcome::HttpError => {
                    breaker.record_failure();
                    if result.status_code.is_some_and(|status| status < 500) {
                        break;
                    }
                }
                // Retryable breaker failures.
                ScrapeOutcome::Timeout
                | ScrapeOutcome::ConnectionError
                | ScrapeOutcome::UnknownError => {
                    breaker.record_failure();
                }
                ScrapeOutcome::CircuitOpen => break,
            }
        }

        metrics::counter!("fetcher.outcome", "outcome" => result.outcome.as_str()).increment(1);
        result
    }

    async fn attempt(
        &self,
        url: &str,
        host: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> ScrapeResult {
        let started = Instant::now();

        let (client, proxy_index) = match self.proxies.next_proxy() {
            Some((index, _)) => {
                metrics::counter!("fetcher.proxy.rotations").increment(1);
                (&self.proxy_clients[index], Some(index))
            }
            None => (&self.direct_client, None),
        };

        let mut request = client
            .get(url)
            .header("User-Agent", self.agents.choose_user_agent())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5");
        if let Some(headers) = headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let outcome = classify_transport_error(&e);
                if matches!(
                    outcome,
                    ScrapeOutcome::Timeout | ScrapeOutcome::ConnectionError
                ) {
                    if let Some(index) = proxy_index {
                        self.proxies.report_failure(index);
                    }
                }
                let mut result = ScrapeResult::failure(url, outcome, e.to_string());
                result.response_time = started.elapsed().as_secs_f64();
                return result;
            }
        };

        let status = response.status().as_u16();
        let mut result = ScrapeResult::new(url, ScrapeOutcome::UnknownError);
        result.status_code = Some(status);
        result.response_time = started.elapsed().as_secs_f64();

        match status {
            429 => {
                result.outcome = ScrapeOutcome::RateLimited;
                result.error_message = Some("Rate limited".to_string());
                return result;
            }
            403 => {
                result.outcome = ScrapeOutcome::Blocked;
                result.error_message = Some("Access forbidden".to_string());
                return result;
            }
            400.. => {
                result.outcome = ScrapeOutcome::HttpError;
                result.error_message = Some(format!("HTTP {}", status));
                return result;
            }
            _ => {}
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                let outcome = classify_transport_error(&e);
                if matches!(
                    outcome,
                    ScrapeOutcome::Timeout | ScrapeOutcome::ConnectionError
                ) {
                    if let Some(index) = proxy_index {
                        self.proxies.report_failure(index);
                    }
                }
                result.outcome = outcome;
                result.error_message = Some(e.to_string());
                result.response_time = started.elapsed().as_secs_f64();
                return result;
            }
        };

        result.response_time = started.elapsed().as_secs_f64();
        result.bytes_downloaded = body.len() as u64;
        metrics::histogram!("fetcher.request.latency", "host" => host.to_string())
            .record(result.response_time);

        if let Some(index) = proxy_index {
            self.proxies.report_success(index);
        }

        let Ok(base_url) = Url::parse(url) else {
            result.outcome = ScrapeOutcome::UnknownError;
            result.error_message = Some("Unparseable base URL".to_string());
            return result;
        };

        for extractor in &self.extractors {
            match extractor.extract(&body, &base_url) {
                Ok(extraction) => {
                    if extraction.text.len() >= self.config.min_content_length {
                        tracing::debug!(
                            url = %url,
                            extractor = extractor.name(),
                            bytes = result.bytes_downloaded,
                            "Content extracted"
                        );
                        result.outcome = ScrapeOutcome::Success;
                        result.title = extraction.title;
                        result.text = Some(extraction.text);
                        result.links = extraction.links;
                        result.metadata = extraction.metadata;
                        return result;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        url = %url,
                        extractor = extractor.name(),
                        error = %e,
                        "Extractor produced nothing, trying next"
                    );
                }
            }
        }

        result.outcome = ScrapeOutcome::ExtractionError;
        result.error_message = Some("Content too short".to_string());
        result
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut permits = self.host_permits.lock().unwrap();
        Arc::clone(permits.entry(host.to_string()).or_insert_with(|| {
            Arc::new(Semaphore::new(self.config.max_concurrent_per_host))
        }))
    }

    /// Drop per-host breakers that have been quiet longer than `max_idle`.
    pub fn sweep_idle_breakers(&self, max_idle: Duration) -> usize {
        self.breakers.sweep_idle(max_idle)
    }

    /// Breaker state of one host, for observability and tests.
    pub fn breaker_state(&self, host: &str) -> CircuitState {
        self.breakers.breaker_for(host).current_state()
    }

    pub fn proxy_stats(&self) -> ProxyStats {
        self.proxies.stats()
    }
}

fn build_client(
    config: &FetcherConfig,
    proxy: Option<&str>,
) -> Result<reqwest::Client, FetchInitError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs_f64(config.connect_timeout_seconds))
        .read_timeout(Duration::from_secs_f64(config.read_timeout_seconds))
        .timeout(Duration::from_secs_f64(config.total_timeout_seconds))
        .redirect(reqwest::redirect::Policy::limited(10))
        .gzip(true);

    if let Some(endpoint) = proxy {
        let proxy = reqwest::Proxy::all(endpoint)
            .map_err(|e| FetchInitError::Proxy(endpoint.to_string(), e.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| FetchInitError::Client(e.to_string()))
}

fn classify_transport_error(error: &reqwest::Error) -> ScrapeOutcome {
    if error.is_timeout() {
        ScrapeOutcome::Timeout
    } else if error.is_connect() {
        ScrapeOutcome::ConnectionError
    } else {
        ScrapeOutcome::UnknownError
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchInitError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Invalid proxy endpoint {0}: {1}")]
    Proxy(String, String),
}
