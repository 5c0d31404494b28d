pub mod config;
pub mod error;
pub mod ids;
pub mod priority;
pub mod types;
pub mod urls;

pub use error::{Result, TrawlerError};
pub use ids::JobId;
