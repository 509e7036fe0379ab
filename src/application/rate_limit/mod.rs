pub mod limiter;
pub mod token_bucket;

pub use limiter::{AdaptiveRateLimiter, DomainPermit, DomainThrottleSnapshot, RateLimiterConfig, RequestOutcome};
pub use token_bucket::TokenBucket;
