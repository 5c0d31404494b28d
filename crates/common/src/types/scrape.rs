use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Terminal classification of a single fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeOutcome {
    Success,
    Timeout,
    ConnectionError,
    HttpError,
    RateLimited,
    Blocked,
    CircuitOpen,
    ExtractionError,
    UnknownError,
}

impl ScrapeOutcome {
    /// Stable label used for log fields and metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::HttpError => "http_error",
            Self::RateLimited => "rate_limited",
            Self::Blocked => "blocked",
            Self::CircuitOpen => "circuit_open",
            Self::ExtractionError => "extraction_error",
            Self::UnknownError => "unknown_error",
        }
    }
}

/// Everything one fetch produced. Created by the fetcher, consumed by the
/// scheduler, never shared.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub url: String,
    pub outcome: ScrapeOutcome,
    pub status_code: Option<u16>,
    pub title: Option<String>,
    /// Extracted main text; non-empty exactly when outcome is Success.
    pub text: Option<String>,
    /// Absolute outbound links, deduplicated in encounter order.
    pub links: Vec<String>,
    /// Extraction metadata: author, date, sitename, language when known.
    pub metadata: HashMap<String, String>,
    /// Seconds from request start to last body byte.
    pub response_time: f64,
    pub retry_count: u32,
    pub bytes_downloaded: u64,
    pub error_message: Option<String>,
}

impl ScrapeResult {
    pub fn new(url: impl Into<String>, outcome: ScrapeOutcome) -> Self {
        Self {
            url: url.into(),
            outcome,
            status_code: None,
            title: None,
            text: None,
            links: Vec::new(),
            metadata: HashMap::new(),
            response_time: 0.0,
            retry_count: 0,
            bytes_downloaded: 0,
            error_message: None,
        }
    }

    pub fn failure(url: impl Into<String>, outcome: ScrapeOutcome, message: impl Into<String>) -> Self {
        let mut result = Self::new(url, outcome);
        result.error_message = Some(message.into());
        result
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ScrapeOutcome::Success
    }
}
