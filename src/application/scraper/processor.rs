use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::application::scraper::crawler::CrawlerShared;
use crate::application::scraper::links::LinkFilter;
use crate::domain::job::{CrawlJob, CrawlResult};

const CRAWL_ROOT_KEY: &str = "crawl_root";

/// Single consumer of the result queue.
pub struct ResultProcessor {
    shared: Arc<CrawlerShared>,
    results: mpsc::Receiver<CrawlResult>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ResultProcessor {
    pub(crate) fn new(
        shared: Arc<CrawlerShared>,
        results: mpsc::Receiver<CrawlResult>,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            shared,
            results,
            cancel,
            tracker,
        }
    }

    /// Drain results until every worker has dropped its sender.
    pub async fn run(mut self) {
        debug!("Result processor started");
        while let Some(result) = self.results.recv().await {
            self.shared.pending_results.fetch_sub(1, Ordering::Relaxed);
            self.handle(result).await;
        }
        debug!("Result processor stopped");
    }

    async fn handle(&self, result: CrawlResult) {
        self.shared.metrics.write().await.record_attempt(&result);

        let Some(mut job) = self.shared.active_jobs.write().await.remove(&result.job_id) else {
            warn!(job_id = %result.job_id, "Result for unknown job");
            return;
        };

        if result.success {
            self.store(&result).await;
            job.complete();
            self.shared.metrics.write().await.jobs_completed += 1;
            debug!(job_id = %job.id, url = %job.url, quality = result.quality_score, "Job completed");
            self.follow_links(&job, &result).await;
            return;
        }

        let error = result.error.clone().unwrap_or_else(|| "Unknown error".to_string());
        let retryable = result.failure.is_some_and(|kind| kind.is_retryable());
        if retryable && job.attempt_count <= self.shared.config.retry_attempts {
            job.requeue(error);
            if self.cancel.is_cancelled() {
                // Shutdown collects it from the registry
                self.shared.active_jobs.write().await.insert(job.id, job);
                return;
            }
            self.schedule_retry(job).await;
            return;
        }

        warn!(job_id = %job.id, url = %job.url, attempts = job.attempt_count, "Job failed: {}", error);
        job.fail(error);
        self.shared.metrics.write().await.jobs_failed += 1;
    }

    async fn store(&self, result: &CrawlResult) {
        let (Some(storage), Some(document)) = (&self.shared.storage, &result.document) else {
            return;
        };
        match storage.store_document(document).await {
            Ok(id) => {
                debug!(job_id = %result.job_id, "Stored document {}", id);
                self.shared.metrics.write().await.documents_stored += 1;
            }
            Err(e) => {
                error!(job_id = %result.job_id, url = %result.url, "Failed to store document: {}", e);
                self.shared.metrics.write().await.storage_failures += 1;
            }
        }
    }

    /// Park the job in the registry and re-submit it after the backoff delay.
    async fn schedule_retry(&self, job: CrawlJob) {
        let delay = self.shared.retry_delay(job.attempt_count);
        let job_id = job.id;
        info!(
            job_id = %job_id,
            attempt = job.attempt_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        self.shared.active_jobs.write().await.insert(job_id, job);
        self.shared.metrics.write().await.jobs_retried += 1;

        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(job) = shared.active_jobs.write().await.remove(&job_id) else {
                return;
            };
            if let Err(mut job) = shared.job_queue.try_enqueue(job).await {
                warn!(job_id = %job_id, "Job queue full at retry, giving up");
                job.fail("Job queue full at retry".to_string());
                shared.metrics.write().await.jobs_failed += 1;
            }
        });
    }

    /// Turn a page's links into child jobs within the parent's scope.
    async fn follow_links(&self, job: &CrawlJob, result: &CrawlResult) {
        let Some(scope) = &job.scope else {
            return;
        };
        if job.depth >= scope.max_depth || result.extracted_links.is_empty() || self.cancel.is_cancelled() {
            return;
        }

        let filter = match LinkFilter::new(scope) {
            Ok(filter) => filter,
            Err(e) => {
                warn!(job_id = %job.id, "Invalid link pattern, not following links: {}", e);
                return;
            }
        };

        let root = job
            .metadata
            .get(CRAWL_ROOT_KEY)
            .cloned()
            .unwrap_or_else(|| job.id.to_string());

        let mut enqueued = 0u64;
        for link in &result.extracted_links {
            let Some(url) = filter.accept(&job.domain, link) else {
                continue;
            };
            {
                let mut seen = self.shared.seen_urls.lock().await;
                if job.depth == 0 {
                    seen.insert(format!("{}|{}", root, job.url));
                }
                if !seen.insert(format!("{}|{}", root, url)) {
                    continue;
                }
            }

            let mut child = match job.child(&url) {
                Ok(child) => child,
                Err(e) => {
                    debug!("Skipping link {}: {}", url, e);
                    continue;
                }
            };
            child.metadata.insert(CRAWL_ROOT_KEY.to_string(), root.clone());

            if self.shared.enqueue(child).await.is_err() {
                debug!("Job queue full, skipping link {}", url);
                continue;
            }
            enqueued += 1;
        }

        if enqueued > 0 {
            self.shared.metrics.write().await.links_enqueued += enqueued;
            debug!(job_id = %job.id, "Enqueued {} links", enqueued);
        }
    }
}
