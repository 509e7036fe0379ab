use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Scheduling history of one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceMetrics {
    pub source_id: String,
    pub crawls_dispatched: u64,
    pub dispatch_failures: u64,
    pub jobs_submitted: u64,
    pub last_dispatched: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SourceMetrics {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Default::default()
        }
    }
}

/// Service-level view republished from the crawler on every metrics tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub total_documents: u64,
    pub documents_stored: u64,
    pub failed_jobs: u64,
    pub average_quality: f64,
    pub success_rate: f64,
    pub queued_jobs: usize,
    pub active_jobs: usize,
    pub dropped_results: u64,
    pub total_sources: usize,
    pub active_sources: usize,
    pub paused_sources: usize,
    pub error_sources: usize,
    pub disabled_sources: usize,
    pub throttled_domains: usize,
    pub uptime: Duration,
    pub last_updated: Option<DateTime<Utc>>,
}
