pub mod config;
pub mod error;
pub mod identity;
pub mod retry;
pub mod throttle;
pub mod types;

pub use config::HarvestConfig;
pub use error::HarvestError;
pub use identity::{IdentityKey, IdentityPrecision};
pub use retry::{RetryPolicy, Retryable};
pub use throttle::RateLimiter;
pub use types::*;
