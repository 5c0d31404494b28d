pub mod bloom;
pub mod frontier;
pub mod seeds;
pub mod store;

pub use bloom::{BloomConfig, BloomFilter};
pub use frontier::{FrontierError, UrlFrontier};
pub use seeds::{SeedError, SeedLoader, SeedStats};
pub use store::{CoordinationStore, StoreError};
