use thiserror::Error;

/// Top-level error type for trawler operations.
#[derive(Debug, Error)]
pub enum TrawlerError {
    // --- Hard dependency errors (crawl cannot proceed) ---
    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("Frontier unavailable: {0}")]
    FrontierUnavailable(String),

    // --- Operational errors ---
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl TrawlerError {
    /// Whether this error should pause the scheduler rather than fail one URL.
    pub fn is_hard_dependency(&self) -> bool {
        matches!(self, Self::Store(_) | Self::FrontierUnavailable(_))
    }
}

/// Result type alias for trawler operations.
pub type Result<T> = std::result::Result<T, TrawlerError>;
