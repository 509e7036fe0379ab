#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fortai_corpus_crawler::application::compliance::{ComplianceConfig, ComplianceEngine};
use fortai_corpus_crawler::application::rate_limit::{AdaptiveRateLimiter, RateLimiterConfig};

pub const ROBOTS_PUBLIC_ONLY: &str = "User-agent: *\nAllow: /public/\nDisallow: /admin/\n";

/// Compliance settings for a local mock server: no default delay and the
/// loopback host trusted so terms of service pass.
pub fn local_compliance() -> ComplianceConfig {
    ComplianceConfig {
        default_crawl_delay: Duration::ZERO,
        trusted_domains: vec!["127.0.0.1".to_string()],
        robots_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

pub fn compliance_engine(config: ComplianceConfig) -> Arc<ComplianceEngine> {
    Arc::new(ComplianceEngine::new(config).expect("compliance engine"))
}

pub fn fast_limiter() -> Arc<AdaptiveRateLimiter> {
    Arc::new(AdaptiveRateLimiter::new(RateLimiterConfig {
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_secs(1),
        initial_delay: Duration::from_millis(5),
        max_backoff_delay: Duration::from_millis(500),
        max_concurrent_per_domain: 4,
        refill_interval: Duration::from_millis(5),
        wait_timeout: Duration::from_secs(5),
        ..Default::default()
    }))
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
