//! robots.txt, terms-of-service and domain-list policy.

pub mod cache;
pub mod engine;
pub mod robots;
pub mod terms;

pub use engine::{CacheStats, ComplianceConfig, ComplianceEngine};
