use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::rate_limit::RequestOutcome;
use crate::application::scraper::crawler::CrawlerShared;
use crate::domain::job::{CrawlJob, CrawlResult, FailureKind};
use crate::utils::error::RateLimitError;

const NEUTRAL_QUALITY_SCORE: f64 = 0.5;

pub struct CrawlWorker {
    worker_id: usize,
    shared: Arc<CrawlerShared>,
    results: mpsc::Sender<CrawlResult>,
    cancel: CancellationToken,
}

impl CrawlWorker {
    pub(crate) fn new(
        worker_id: usize,
        shared: Arc<CrawlerShared>,
        results: mpsc::Sender<CrawlResult>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            worker_id,
            shared,
            results,
            cancel,
        }
    }

    pub async fn run(self) {
        debug!("Crawl worker {} started", self.worker_id);

        while let Some(mut job) = self.shared.job_queue.dequeue(&self.cancel).await {
            job.start();
            self.shared.active_jobs.write().await.insert(job.id, job.clone());
            self.shared.metrics.write().await.worker_mut(self.worker_id).current_job = Some(job.id);

            let result = self.execute(&job).await;
            self.shared.metrics.write().await.worker_mut(self.worker_id).current_job = None;

            match result {
                // Left in the active registry so `stop` hands it back
                None => {
                    info!(job_id = %job.id, "Job interrupted by shutdown");
                    break;
                }
                Some(result) => self.deliver(result).await,
            }
        }

        debug!("Crawl worker {} stopped", self.worker_id);
    }

    /// Run the pipeline under the job timeout. `None` means the crawler was
    /// cancelled before the job finished.
    async fn execute(&self, job: &CrawlJob) -> Option<CrawlResult> {
        let started = Instant::now();
        let pipeline = AssertUnwindSafe(self.process_job(job)).catch_unwind();

        let mut result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            outcome = tokio::time::timeout(self.shared.config.job_timeout, pipeline) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(job_id = %job.id, "Job panicked: {}", message);
                    CrawlResult::new(job, self.worker_id).failed(FailureKind::Panicked, format!("Job panicked: {}", message))
                }
                Err(_) => {
                    warn!(job_id = %job.id, "Job timed out after {:?}", self.shared.config.job_timeout);
                    CrawlResult::new(job, self.worker_id).failed(
                        FailureKind::Timeout,
                        format!("Job timed out after {}s", self.shared.config.job_timeout.as_secs()),
                    )
                }
            }
        };

        if result.failure == Some(FailureKind::Cancelled) {
            return None;
        }
        result.processing_time = started.elapsed();
        Some(result)
    }

    async fn process_job(&self, job: &CrawlJob) -> CrawlResult {
        let shared = &self.shared;
        let mut result = CrawlResult::new(job, self.worker_id);

        let decision = match shared.compliance.check_compliance(&job.url).await {
            Ok(decision) => decision,
            Err(e) => return result.failed(FailureKind::PolicyDenied, e.to_string()),
        };
        if !decision.allowed {
            let reason = format!("URL not allowed: {}", decision.restrictions.join("; "));
            debug!(job_id = %job.id, url = %job.url, "{}", reason);
            result.compliance_decision = Some(decision);
            return result.failed(FailureKind::PolicyDenied, reason);
        }
        let required_delay = decision.required_delay;
        result.compliance_decision = Some(decision);

        let permit = match shared.rate_limiter.wait(&job.domain, required_delay, &self.cancel).await {
            Ok(permit) => permit,
            Err(e @ RateLimitError::Cancelled { .. }) => return result.failed(FailureKind::Cancelled, e.to_string()),
            Err(e) => return result.failed(FailureKind::RateLimited, e.to_string()),
        };

        let extraction = match shared.extractor.extract_content(&job.url).await {
            Ok(extraction) => extraction,
            Err(e) => {
                drop(permit);
                shared
                    .rate_limiter
                    .record_request(&job.domain, RequestOutcome::failure(None, std::time::Duration::ZERO))
                    .await;
                return result.failed(FailureKind::Extraction, format!("Extractor error: {}", e));
            }
        };
        drop(permit);
        result.status_code = extraction.status_code;

        let mut document = match (extraction.success, extraction.document) {
            (true, Some(document)) => document,
            (_, _) => {
                let outcome = if extraction.status_code == Some(429) {
                    RequestOutcome::rate_limited(extraction.processing_time)
                } else {
                    RequestOutcome::failure(extraction.status_code, extraction.processing_time)
                };
                shared.rate_limiter.record_request(&job.domain, outcome).await;
                let kind = if outcome.is_rate_limited() {
                    FailureKind::RateLimited
                } else {
                    FailureKind::Extraction
                };
                let error = extraction
                    .error
                    .unwrap_or_else(|| "Extraction produced no document".to_string());
                return result.failed(kind, error);
            }
        };

        document.source_id = job.source_id.clone();
        for (key, value) in &job.metadata {
            document.add_metadata(key, serde_json::json!(value));
        }
        document.add_metadata("depth", serde_json::json!(job.depth));

        let (score, tier) = match &shared.validator {
            None => (NEUTRAL_QUALITY_SCORE, None),
            Some(validator) => match validator.validate_content(&document.content, &document.metadata).await {
                Ok(report) => (report.overall_score, Some(report.quality_tier)),
                Err(e) => {
                    warn!(job_id = %job.id, "Quality validation failed: {}", e);
                    shared
                        .rate_limiter
                        .record_request(
                            &job.domain,
                            RequestOutcome::success(extraction.status_code, extraction.processing_time),
                        )
                        .await;
                    result.extracted_links = document.links.clone();
                    result.document = Some(document);
                    return result.failed(FailureKind::Validation, format!("Quality validation failed: {}", e));
                }
            },
        };
        document.quality_score = Some(score);
        document.quality_tier = tier;
        result.quality_score = score;
        result.extracted_links = document.links.clone();
        result.document = Some(document);
        result.success = true;

        if score < shared.config.quality_threshold {
            result = result.failed(
                FailureKind::BelowQualityThreshold,
                format!(
                    "Quality score {:.2} below threshold {:.2}",
                    score, shared.config.quality_threshold
                ),
            );
        }

        shared
            .rate_limiter
            .record_request(
                &job.domain,
                RequestOutcome::success(extraction.status_code, extraction.processing_time),
            )
            .await;
        result
    }

    /// Best effort: a full result queue drops the result.
    async fn deliver(&self, result: CrawlResult) {
        let job_id = result.job_id;
        self.shared.pending_results.fetch_add(1, Ordering::Relaxed);
        match self.results.try_send(result) {
            Ok(()) => {}
            Err(TrySendError::Full(result)) | Err(TrySendError::Closed(result)) => {
                self.shared.pending_results.fetch_sub(1, Ordering::Relaxed);
                warn!(job_id = %job_id, url = %result.url, "Result queue full, dropping result");
                self.shared.active_jobs.write().await.remove(&job_id);
                self.shared.metrics.write().await.dropped_results += 1;
            }
        }
    }
}
