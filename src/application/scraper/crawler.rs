use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::compliance::ComplianceEngine;
use crate::application::rate_limit::AdaptiveRateLimiter;
use crate::application::scraper::links::SeenUrls;
use crate::application::scraper::metrics::{CrawlMetrics, QueueStatus};
use crate::application::scraper::processor::ResultProcessor;
use crate::application::scraper::worker::CrawlWorker;
use crate::config::settings::Crawler as CrawlerSettings;
use crate::domain::job::{CrawlJob, CrawlResult, JobStatus};
use crate::infrastructure::extractor::ContentExtractor;
use crate::infrastructure::queue::JobQueue;
use crate::infrastructure::storage::DocumentStorage;
use crate::infrastructure::validator::QualityValidator;
use crate::utils::error::{AppError, Result};

/// Configuration for the crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Number of worker tasks
    pub worker_count: usize,
    /// Capacity of the job queue
    pub job_queue_size: usize,
    /// Capacity of the result queue
    pub result_queue_size: usize,
    /// Upper bound for one job's whole pipeline
    pub job_timeout: Duration,
    /// Documents scoring below this are unsuccessful
    pub quality_threshold: f64,
    /// Re-submissions allowed for a transiently failing job
    pub retry_attempts: u32,
    /// Delay before the first re-submission
    pub retry_delay: Duration,
    /// Size of the seen-set used to de-duplicate followed links
    pub max_tracked_urls: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self::from(&CrawlerSettings::default())
    }
}

impl From<&CrawlerSettings> for CrawlerConfig {
    fn from(settings: &CrawlerSettings) -> Self {
        Self {
            worker_count: settings.worker_count,
            job_queue_size: settings.job_queue_size,
            result_queue_size: settings.result_queue_size,
            job_timeout: Duration::from_secs(settings.job_timeout_secs),
            quality_threshold: settings.quality_threshold,
            retry_attempts: settings.retry_attempts,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            max_tracked_urls: settings.max_tracked_urls,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrawlerState {
    Idle,
    Running,
    Stopped,
}

/// State shared by the crawler handle, its workers and its result processor.
pub(crate) struct CrawlerShared {
    pub(crate) config: CrawlerConfig,
    pub(crate) compliance: Arc<ComplianceEngine>,
    pub(crate) rate_limiter: Arc<AdaptiveRateLimiter>,
    pub(crate) extractor: Arc<dyn ContentExtractor>,
    pub(crate) validator: Option<Arc<dyn QualityValidator>>,
    pub(crate) storage: Option<Arc<dyn DocumentStorage>>,
    pub(crate) job_queue: JobQueue<CrawlJob>,
    /// Jobs taken off the queue and not yet finished, including those waiting for a retry
    pub(crate) active_jobs: RwLock<HashMap<Uuid, CrawlJob>>,
    pub(crate) metrics: RwLock<CrawlMetrics>,
    pub(crate) seen_urls: Mutex<SeenUrls>,
    pub(crate) pending_results: AtomicUsize,
}

impl CrawlerShared {
    /// Push onto the job queue, handing the job back when full.
    pub(crate) async fn enqueue(&self, job: CrawlJob) -> std::result::Result<(), CrawlJob> {
        self.job_queue.try_enqueue(job).await?;
        self.metrics.write().await.jobs_submitted += 1;
        Ok(())
    }

    /// Delay before re-submitting a job that has made `attempt` attempts.
    pub(crate) fn retry_delay(&self, attempt: u32) -> Duration {
        let limiter = self.rate_limiter.config();
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let delay = self.config.retry_delay.as_secs_f64() * limiter.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(limiter.max_backoff_delay.as_secs_f64()).max(0.0))
    }
}

/// Fixed pool of workers draining one bounded priority queue, with a single
/// task consuming their results.
pub struct DistributedCrawler {
    shared: Arc<CrawlerShared>,
    state: Mutex<CrawlerState>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl DistributedCrawler {
    pub fn new(
        config: CrawlerConfig,
        compliance: Arc<ComplianceEngine>,
        rate_limiter: Arc<AdaptiveRateLimiter>,
        extractor: Arc<dyn ContentExtractor>,
        validator: Option<Arc<dyn QualityValidator>>,
        storage: Option<Arc<dyn DocumentStorage>>,
    ) -> Self {
        let mut config = config;
        config.worker_count = config.worker_count.max(1);
        config.result_queue_size = config.result_queue_size.max(1);

        let shared = Arc::new(CrawlerShared {
            job_queue: JobQueue::new(config.job_queue_size),
            seen_urls: Mutex::new(SeenUrls::new(config.max_tracked_urls)),
            config,
            compliance,
            rate_limiter,
            extractor,
            validator,
            storage,
            active_jobs: RwLock::new(HashMap::new()),
            metrics: RwLock::new(CrawlMetrics::default()),
            pending_results: AtomicUsize::new(0),
        });

        Self {
            shared,
            state: Mutex::new(CrawlerState::Idle),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.shared.config
    }

    /// Queue a job without waiting. Fails with `QueueFull` when the queue is
    /// at capacity and with `ShuttingDown` once `stop` has begun.
    pub async fn submit_job(&self, job: CrawlJob) -> Result<Uuid> {
        if self.cancel.is_cancelled() {
            return Err(AppError::ShuttingDown);
        }
        if job.status != JobStatus::Pending {
            return Err(AppError::InvalidInput(format!(
                "Job {} is {}, only pending jobs can be submitted",
                job.id, job.status
            )));
        }

        let job_id = job.id;
        let url = job.url.clone();
        if self.shared.enqueue(job).await.is_err() {
            warn!("Job queue full, rejecting {}", url);
            return Err(AppError::QueueFull {
                capacity: self.shared.job_queue.capacity(),
            });
        }

        debug!(job_id = %job_id, url = %url, "Job submitted");
        Ok(job_id)
    }

    /// Submit jobs in order, stopping at the first failure. Jobs before
    /// the failing one stay queued.
    pub async fn submit_batch(&self, jobs: Vec<CrawlJob>) -> Result<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            ids.push(self.submit_job(job).await?);
        }
        Ok(ids)
    }

    /// Spawn the workers and the result processor.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            CrawlerState::Running => {
                warn!("Crawler already running");
                return Ok(());
            }
            CrawlerState::Stopped => return Err(AppError::ShuttingDown),
            CrawlerState::Idle => {}
        }

        let config = &self.shared.config;
        let (result_tx, result_rx) = mpsc::channel::<CrawlResult>(config.result_queue_size);

        for worker_id in 0..config.worker_count {
            let worker = CrawlWorker::new(worker_id, self.shared.clone(), result_tx.clone(), self.cancel.clone());
            self.tracker.spawn(worker.run());
        }
        // Workers own every sender; the processor ends once they are gone
        drop(result_tx);

        let processor = ResultProcessor::new(self.shared.clone(), result_rx, self.cancel.clone(), self.tracker.clone());
        self.tracker.spawn(processor.run());

        self.shared.metrics.write().await.started_at = Some(chrono::Utc::now());
        *state = CrawlerState::Running;
        info!("Crawler started with {} workers", config.worker_count);
        Ok(())
    }

    /// Stop every task and return the jobs that were not processed: those
    /// still queued plus those interrupted mid-flight or waiting for a retry.
    pub async fn stop(&self) -> Vec<CrawlJob> {
        {
            let mut state = self.state.lock().await;
            if *state == CrawlerState::Stopped {
                return Vec::new();
            }
            *state = CrawlerState::Stopped;
        }

        info!("Stopping crawler");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let mut unprocessed = self.shared.job_queue.drain().await;
        let interrupted: Vec<CrawlJob> = self.shared.active_jobs.write().await.drain().map(|(_, job)| job).collect();
        for mut job in interrupted {
            if job.status == JobStatus::Processing {
                job.requeue("Interrupted by shutdown".to_string());
            }
            unprocessed.push(job);
        }

        info!("Crawler stopped, {} jobs unprocessed", unprocessed.len());
        unprocessed
    }

    pub async fn is_running(&self) -> bool {
        *self.state.lock().await == CrawlerState::Running
    }

    pub async fn metrics(&self) -> CrawlMetrics {
        self.shared.metrics.read().await.clone()
    }

    pub async fn active_jobs(&self) -> Vec<CrawlJob> {
        self.shared.active_jobs.read().await.values().cloned().collect()
    }

    pub async fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            queued_jobs: self.shared.job_queue.len().await,
            job_queue_capacity: self.shared.job_queue.capacity(),
            pending_results: self.shared.pending_results.load(Ordering::Relaxed),
            result_queue_capacity: self.shared.config.result_queue_size,
            active_jobs: self.shared.active_jobs.read().await.len(),
            workers: self.shared.config.worker_count,
            running: self.is_running().await,
        }
    }

    pub fn rate_limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.shared.rate_limiter
    }

    pub fn compliance(&self) -> &Arc<ComplianceEngine> {
        &self.shared.compliance
    }
}
