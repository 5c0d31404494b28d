use std::path::{Path, PathBuf};

use trawler_common::config::CrawlConfig;

/// Load the crawl configuration.
///
/// Resolution order: explicit path argument, then `TRAWLER_CONFIG`, then
/// `trawler.toml` in the working directory. A missing file means defaults;
/// an unreadable or invalid file is a boot failure.
pub fn load_config(path: Option<&Path>) -> Result<CrawlConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => std::env::var("TRAWLER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("trawler.toml")),
    };

    let config = if path.exists() {
        tracing::info!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead {
            path: path.clone(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            detail: e.to_string(),
        })?
    } else {
        tracing::info!(path = %path.display(), "No configuration file, using defaults");
        CrawlConfig::default()
    };

    validate(&config)?;
    Ok(config)
}

/// Reject configurations that cannot work before anything starts.
pub fn validate(config: &CrawlConfig) -> Result<(), ConfigError> {
    let mut problems: Vec<String> = Vec::new();

    let frontier = &config.frontier;
    if frontier.key_prefix.is_empty() {
        problems.push("frontier.key_prefix must not be empty".to_string());
    }
    if frontier.min_delay <= 0.0 {
        problems.push("frontier.min_delay must be positive".to_string());
    }
    if frontier.min_delay > frontier.default_delay || frontier.default_delay > frontier.max_delay {
        problems.push(
            "frontier delays must satisfy min_delay ≤ default_delay ≤ max_delay".to_string(),
        );
    }
    if frontier.politeness_factor <= 0.0 {
        problems.push("frontier.politeness_factor must be positive".to_string());
    }
    if frontier.expected_items == 0 {
        problems.push("frontier.expected_items must be positive".to_string());
    }
    if !(frontier.false_positive_rate > 0.0 && frontier.false_positive_rate < 1.0) {
        problems.push("frontier.false_positive_rate must be in (0, 1)".to_string());
    }

    let scheduler = &config.scheduler;
    if scheduler.max_workers == 0 {
        problems.push("scheduler.max_workers must be positive".to_string());
    }
    if scheduler.max_requests_per_second <= 0.0 {
        problems.push("scheduler.max_requests_per_second must be positive".to_string());
    }
    if scheduler.max_requests_per_host_per_minute == 0 {
        problems.push("scheduler.max_requests_per_host_per_minute must be positive".to_string());
    }
    if scheduler.queue_low_watermark >= scheduler.queue_high_watermark {
        problems.push("scheduler watermarks must satisfy low < high".to_string());
    }
    if scheduler.url_fetch_timeout_seconds <= 0.0 {
        problems.push("scheduler.url_fetch_timeout_seconds must be positive".to_string());
    }

    let fetcher = &config.fetcher;
    if fetcher.max_concurrent_requests == 0 || fetcher.max_concurrent_per_host == 0 {
        problems.push("fetcher concurrency limits must be positive".to_string());
    }
    if fetcher.retry_base_seconds <= 0.0 || fetcher.retry_base_seconds > fetcher.retry_cap_seconds {
        problems.push("fetcher retry delays must satisfy 0 < base ≤ cap".to_string());
    }
    if fetcher.breaker_failure_threshold == 0 {
        problems.push("fetcher.breaker_failure_threshold must be positive".to_string());
    }
    if fetcher.half_open_max_probes == 0 {
        problems.push("fetcher.half_open_max_probes must be positive".to_string());
    }
    if fetcher.user_agents.is_empty() {
        problems.push("fetcher.user_agents must not be empty".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(problems.join("; ")))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}
