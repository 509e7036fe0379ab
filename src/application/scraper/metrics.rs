use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::job::{CrawlResult, FailureKind};

fn running_average(average: f64, samples: u64, value: f64) -> f64 {
    if samples == 0 {
        return value;
    }
    average + (value - average) / samples as f64
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DomainStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub policy_denials: u64,
    pub rate_limit_failures: u64,
    pub average_quality: f64,
    pub quality_samples: u64,
    pub average_processing_time: Duration,
    pub last_attempt: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub total_processing_time: Duration,
    pub current_job: Option<Uuid>,
    pub last_active: Option<DateTime<Utc>>,
}

impl WorkerStats {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            jobs_processed: 0,
            jobs_succeeded: 0,
            jobs_failed: 0,
            total_processing_time: Duration::ZERO,
            current_job: None,
            last_active: None,
        }
    }
}

/// Crawler-wide counters. Attempt counters move once per result, job
/// counters once per job when it reaches a terminal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlMetrics {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub attempts: u64,
    pub successful_attempts: u64,
    pub policy_denials: u64,
    pub below_quality_threshold: u64,
    pub documents_stored: u64,
    pub storage_failures: u64,
    pub dropped_results: u64,
    pub links_enqueued: u64,
    /// Unsuccessful attempts by cause
    pub failure_kinds: HashMap<FailureKind, u64>,
    pub average_quality_score: f64,
    pub quality_samples: u64,
    pub average_processing_time: Duration,
    pub domain_stats: HashMap<String, DomainStats>,
    pub worker_stats: HashMap<usize, WorkerStats>,
    pub started_at: Option<DateTime<Utc>>,
}

impl CrawlMetrics {
    pub fn record_attempt(&mut self, result: &CrawlResult) {
        let now = Utc::now();
        self.attempts += 1;
        self.average_processing_time = Duration::from_secs_f64(running_average(
            self.average_processing_time.as_secs_f64(),
            self.attempts,
            result.processing_time.as_secs_f64(),
        ));
        if result.success {
            self.successful_attempts += 1;
        }
        match result.failure {
            Some(FailureKind::PolicyDenied) => self.policy_denials += 1,
            Some(FailureKind::BelowQualityThreshold) => self.below_quality_threshold += 1,
            _ => {}
        }
        if let Some(kind) = result.failure {
            *self.failure_kinds.entry(kind).or_default() += 1;
        }

        let scored = result.document.is_some();
        if scored {
            self.quality_samples += 1;
            self.average_quality_score =
                running_average(self.average_quality_score, self.quality_samples, result.quality_score);
        }

        let domain = self.domain_stats.entry(result.domain.clone()).or_default();
        domain.attempts += 1;
        if result.success {
            domain.successes += 1;
        } else {
            domain.failures += 1;
        }
        match result.failure {
            Some(FailureKind::PolicyDenied) => domain.policy_denials += 1,
            Some(FailureKind::RateLimited) => domain.rate_limit_failures += 1,
            _ => {}
        }
        if scored {
            domain.quality_samples += 1;
            domain.average_quality =
                running_average(domain.average_quality, domain.quality_samples, result.quality_score);
        }
        domain.average_processing_time = Duration::from_secs_f64(running_average(
            domain.average_processing_time.as_secs_f64(),
            domain.attempts,
            result.processing_time.as_secs_f64(),
        ));
        domain.last_attempt = Some(now);

        let worker = self.worker_mut(result.worker_id);
        worker.jobs_processed += 1;
        if result.success {
            worker.jobs_succeeded += 1;
        } else {
            worker.jobs_failed += 1;
        }
        worker.total_processing_time += result.processing_time;
        worker.last_active = Some(now);
    }

    pub fn worker_mut(&mut self, worker_id: usize) -> &mut WorkerStats {
        self.worker_stats
            .entry(worker_id)
            .or_insert_with(|| WorkerStats::new(worker_id))
    }

    /// Completed jobs over finished jobs; zero before anything finished.
    pub fn success_rate(&self) -> f64 {
        let finished = self.jobs_completed + self.jobs_failed;
        if finished == 0 {
            return 0.0;
        }
        self.jobs_completed as f64 / finished as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queued_jobs: usize,
    pub job_queue_capacity: usize,
    pub pending_results: usize,
    pub result_queue_capacity: usize,
    pub active_jobs: usize,
    pub workers: usize,
    pub running: bool,
}
