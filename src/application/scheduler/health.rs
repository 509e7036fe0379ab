use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: String,
    pub crawler_running: bool,
    pub queued_jobs: usize,
    pub queue_capacity: usize,
    pub active_jobs: usize,
    pub error_sources: Vec<String>,
    pub pruned_domains: usize,
    pub swept_cache_entries: usize,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}
