pub mod backoff;
pub mod breaker;
pub mod extract;
pub mod fetcher;
pub mod proxy;

pub use backoff::DecorrelatedJitter;
pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use extract::{Extraction, ExtractError, Extractor};
pub use fetcher::{FetchInitError, Fetcher};
pub use proxy::{ProxyRotator, ProxyStats, UserAgentPool};
