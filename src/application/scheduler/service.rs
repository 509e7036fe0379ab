use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::application::scheduler::health::{HealthReport, HealthStatus};
use crate::application::scheduler::metrics::{ServiceMetrics, SourceMetrics};
use crate::application::scraper::DistributedCrawler;
use crate::config::settings::Service as ServiceSettings;
use crate::domain::job::CrawlJob;
use crate::domain::source::{ScrapingSource, SourceStatus};
use crate::utils::error::{AppError, Result};

/// Configuration for the scraping service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Period of the scheduler loop
    pub scheduler_interval: Duration,
    /// Period of the health-check loop
    pub health_check_interval: Duration,
    /// Period of the metrics loop
    pub metrics_interval: Duration,
    /// Sources dispatched concurrently within one scheduler tick
    pub max_concurrent_sources: usize,
    /// Queue length above which the health check warns
    pub queue_warning_threshold: usize,
    /// Rate-limiter state idle for longer than this is pruned
    pub idle_domain_ttl: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from(&ServiceSettings::default())
    }
}

impl From<&ServiceSettings> for ServiceConfig {
    fn from(settings: &ServiceSettings) -> Self {
        Self {
            scheduler_interval: Duration::from_secs(settings.scheduler_interval_secs),
            health_check_interval: Duration::from_secs(settings.health_check_interval_secs),
            metrics_interval: Duration::from_secs(settings.metrics_interval_secs),
            max_concurrent_sources: settings.max_concurrent_sources,
            queue_warning_threshold: settings.queue_warning_threshold,
            idle_domain_ttl: Duration::from_secs(settings.idle_domain_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Idle,
    Running,
    Stopped,
}

/// Source registry plus the scheduler, health-check and metrics loops
/// that feed the crawler.
pub struct ScrapingService {
    config: ServiceConfig,
    crawler: Arc<DistributedCrawler>,
    sources: RwLock<HashMap<String, ScrapingSource>>,
    source_metrics: RwLock<HashMap<String, SourceMetrics>>,
    metrics: RwLock<ServiceMetrics>,
    dispatch_slots: Semaphore,
    state: Mutex<ServiceState>,
    started_at: RwLock<Option<Instant>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ScrapingService {
    pub fn new(config: ServiceConfig, crawler: Arc<DistributedCrawler>) -> Self {
        let dispatch_slots = Semaphore::new(config.max_concurrent_sources.max(1));
        Self {
            config,
            crawler,
            sources: RwLock::new(HashMap::new()),
            source_metrics: RwLock::new(HashMap::new()),
            metrics: RwLock::new(ServiceMetrics::default()),
            dispatch_slots,
            state: Mutex::new(ServiceState::Idle),
            started_at: RwLock::new(None),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn crawler(&self) -> &Arc<DistributedCrawler> {
        &self.crawler
    }

    pub async fn add_source(&self, source: ScrapingSource) -> Result<()> {
        source.validate()?;

        let mut sources = self.sources.write().await;
        if sources.contains_key(&source.id) {
            return Err(AppError::AlreadyExists(format!("Source {}", source.id)));
        }
        info!(
            source_id = %source.id,
            start_urls = source.start_urls.len(),
            interval_secs = source.crawl_interval.as_secs(),
            "Added source {}",
            source.name
        );
        self.source_metrics
            .write()
            .await
            .insert(source.id.clone(), SourceMetrics::new(&source.id));
        sources.insert(source.id.clone(), source);
        Ok(())
    }

    pub async fn remove_source(&self, source_id: &str) -> Result<ScrapingSource> {
        let removed = self
            .sources
            .write()
            .await
            .remove(source_id)
            .ok_or_else(|| AppError::NotFound(format!("Source {}", source_id)))?;
        self.source_metrics.write().await.remove(source_id);
        info!(source_id = %source_id, "Removed source");
        Ok(removed)
    }

    pub async fn get_source(&self, source_id: &str) -> Option<ScrapingSource> {
        self.sources.read().await.get(source_id).cloned()
    }

    /// All sources, ordered by id.
    pub async fn list_sources(&self) -> Vec<ScrapingSource> {
        let mut sources: Vec<ScrapingSource> = self.sources.read().await.values().cloned().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        sources
    }

    pub async fn pause_source(&self, source_id: &str) -> Result<()> {
        self.set_status(source_id, SourceStatus::Paused).await
    }

    pub async fn resume_source(&self, source_id: &str) -> Result<()> {
        self.set_status(source_id, SourceStatus::Active).await
    }

    async fn set_status(&self, source_id: &str, status: SourceStatus) -> Result<()> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(source_id)
            .ok_or_else(|| AppError::NotFound(format!("Source {}", source_id)))?;
        if source.status != status {
            info!(source_id = %source_id, from = %source.status, to = %status, "Source status changed");
            source.status = status;
            source.updated_at = Utc::now();
        }
        Ok(())
    }

    pub async fn source_metrics(&self, source_id: &str) -> Option<SourceMetrics> {
        self.source_metrics.read().await.get(source_id).cloned()
    }

    pub async fn metrics(&self) -> ServiceMetrics {
        self.metrics.read().await.clone()
    }

    /// Start the crawler and the three service loops.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            ServiceState::Running => {
                warn!("Scraping service already running");
                return Ok(());
            }
            ServiceState::Stopped => return Err(AppError::ShuttingDown),
            ServiceState::Idle => {}
        }

        self.crawler.start().await?;
        *self.started_at.write().await = Some(Instant::now());

        self.spawn_loop("scheduler", self.config.scheduler_interval, |service| async move {
            service.run_scheduler_tick().await;
        });
        self.spawn_loop("health check", self.config.health_check_interval, |service| async move {
            service.health_check().await;
        });
        self.spawn_loop("metrics", self.config.metrics_interval, |service| async move {
            service.update_metrics().await;
        });

        *state = ServiceState::Running;
        info!("Scraping service started");
        Ok(())
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let service = self.clone();
        let cancel = self.cancel.clone();
        let period = period.max(Duration::from_millis(1));
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!("Started {} loop every {:?}", name, period);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => tick(service.clone()).await,
                }
            }
            debug!("Stopped {} loop", name);
        });
    }

    /// Stop the loops, then the crawler. Returns the crawler's unprocessed jobs.
    pub async fn stop(&self) -> Vec<CrawlJob> {
        {
            let mut state = self.state.lock().await;
            if *state == ServiceState::Stopped {
                return Vec::new();
            }
            *state = ServiceState::Stopped;
        }

        info!("Stopping scraping service");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let unprocessed = self.crawler.stop().await;
        info!("Scraping service stopped, {} jobs unprocessed", unprocessed.len());
        unprocessed
    }

    /// Dispatch every due source once. Returns how many were dispatched successfully.
    pub async fn run_scheduler_tick(&self) -> usize {
        let now = Utc::now();
        let due: Vec<String> = self
            .sources
            .read()
            .await
            .values()
            .filter(|source| source.is_due(now))
            .map(|source| source.id.clone())
            .collect();
        if due.is_empty() {
            return 0;
        }

        debug!("Scheduler tick: {} sources due", due.len());
        let dispatches = due.iter().map(|source_id| async move {
            let Ok(_slot) = self.dispatch_slots.acquire().await else {
                return false;
            };
            self.dispatch_source(source_id).await
        });
        futures::future::join_all(dispatches)
            .await
            .into_iter()
            .filter(|dispatched| *dispatched)
            .count()
    }

    async fn dispatch_source(&self, source_id: &str) -> bool {
        let now = Utc::now();
        let source = {
            let mut sources = self.sources.write().await;
            let Some(source) = sources.get_mut(source_id).filter(|s| s.is_due(now)) else {
                return false;
            };
            // Claimed under the lock so an overlapping tick skips it
            source.claim(now);
            source.clone()
        };

        let submitted = match source.build_jobs() {
            Ok(jobs) => self.crawler.submit_batch(jobs).await.map(|ids| ids.len()),
            Err(e) => Err(e),
        };

        let mut sources = self.sources.write().await;
        let Some(source) = sources.get_mut(source_id) else {
            return false;
        };
        // A pause issued mid-dispatch wins over the outcome
        let held_status = matches!(source.status, SourceStatus::Paused | SourceStatus::Disabled).then_some(source.status);

        let mut source_metrics = self.source_metrics.write().await;
        let stats = source_metrics
            .entry(source_id.to_string())
            .or_insert_with(|| SourceMetrics::new(source_id));
        stats.last_dispatched = Some(now);

        let dispatched = match submitted {
            Ok(count) => {
                source.mark_crawled(now);
                stats.crawls_dispatched += 1;
                stats.jobs_submitted += count as u64;
                stats.last_error = None;
                info!(source_id = %source_id, jobs = count, next_crawl = %source.next_crawl, "Dispatched source");
                true
            }
            Err(e) => {
                error!(source_id = %source_id, "Failed to dispatch source: {}", e);
                source.mark_failed(now, e.to_string());
                stats.dispatch_failures += 1;
                stats.last_error = Some(e.to_string());
                false
            }
        };
        if let Some(status) = held_status {
            source.status = status;
        }
        dispatched
    }

    /// Warn about backlog and failing sources, prune idle limiter state,
    /// sweep expired compliance entries.
    pub async fn health_check(&self) -> HealthReport {
        let queue = self.crawler.queue_status().await;
        let error_sources: Vec<String> = self
            .list_sources()
            .await
            .into_iter()
            .filter(|source| source.status == SourceStatus::Error)
            .map(|source| source.id)
            .collect();

        let backlog = queue.queued_jobs > self.config.queue_warning_threshold;
        if backlog {
            warn!(
                "Job queue length {} is above the warning threshold {}",
                queue.queued_jobs, self.config.queue_warning_threshold
            );
        }
        if !error_sources.is_empty() {
            warn!("{} sources in error state: {}", error_sources.len(), error_sources.join(", "));
        }

        let pruned_domains = self.crawler.rate_limiter().prune_idle(self.config.idle_domain_ttl).await;
        let swept_cache_entries = self.crawler.compliance().sweep_expired().await;

        let report = HealthReport {
            status: if backlog || !error_sources.is_empty() {
                HealthStatus::Degraded
            } else {
                HealthStatus::Ok
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            crawler_running: queue.running,
            queued_jobs: queue.queued_jobs,
            queue_capacity: queue.job_queue_capacity,
            active_jobs: queue.active_jobs,
            error_sources,
            pruned_domains,
            swept_cache_entries,
            checked_at: Utc::now(),
        };
        debug!(status = ?report.status, queued = report.queued_jobs, "Health check complete");
        report
    }

    /// Republish the crawler's counters as service metrics.
    pub async fn update_metrics(&self) -> ServiceMetrics {
        let crawl = self.crawler.metrics().await;
        let queue = self.crawler.queue_status().await;
        let throttled_domains = self.crawler.rate_limiter().tracked_domains().await;
        let uptime = self
            .started_at
            .read()
            .await
            .map(|started| started.elapsed())
            .unwrap_or_default();

        let mut by_status: HashMap<SourceStatus, usize> = HashMap::new();
        let total_sources = {
            let sources = self.sources.read().await;
            for source in sources.values() {
                *by_status.entry(source.status).or_default() += 1;
            }
            sources.len()
        };
        let count = |status: SourceStatus| by_status.get(&status).copied().unwrap_or(0);

        let snapshot = ServiceMetrics {
            total_documents: crawl.jobs_completed,
            documents_stored: crawl.documents_stored,
            failed_jobs: crawl.jobs_failed,
            average_quality: crawl.average_quality_score,
            success_rate: crawl.success_rate(),
            queued_jobs: queue.queued_jobs,
            active_jobs: queue.active_jobs,
            dropped_results: crawl.dropped_results,
            total_sources,
            active_sources: count(SourceStatus::Active),
            paused_sources: count(SourceStatus::Paused),
            error_sources: count(SourceStatus::Error),
            disabled_sources: count(SourceStatus::Disabled),
            throttled_domains,
            uptime,
            last_updated: Some(Utc::now()),
        };
        *self.metrics.write().await = snapshot.clone();
        debug!(
            documents = snapshot.total_documents,
            success_rate = snapshot.success_rate,
            "Service metrics updated"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::compliance::{ComplianceConfig, ComplianceEngine};
    use crate::application::rate_limit::{AdaptiveRateLimiter, RateLimiterConfig};
    use crate::application::scraper::CrawlerConfig;
    use crate::infrastructure::extractor::MockContentExtractor;

    fn service(job_queue_size: usize) -> Arc<ScrapingService> {
        let crawler = DistributedCrawler::new(
            CrawlerConfig {
                job_queue_size,
                ..Default::default()
            },
            Arc::new(ComplianceEngine::new(ComplianceConfig::default()).unwrap()),
            Arc::new(AdaptiveRateLimiter::new(RateLimiterConfig::default())),
            Arc::new(MockContentExtractor::new()),
            None,
            None,
        );
        Arc::new(ScrapingService::new(ServiceConfig::default(), Arc::new(crawler)))
    }

    fn source(id: &str, start_urls: usize) -> ScrapingSource {
        ScrapingSource::new(
            id,
            format!("Source {}", id),
            "https://docs.example.org",
            (0..start_urls)
                .map(|i| format!("https://docs.example.org/{}/{}", id, i))
                .collect(),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn registry_rejects_duplicates_and_invalid_sources() {
        let service = service(10);
        service.add_source(source("a", 1)).await.unwrap();
        assert!(matches!(
            service.add_source(source("a", 1)).await,
            Err(AppError::AlreadyExists(_))
        ));
        assert!(matches!(
            service.add_source(source("empty", 0)).await,
            Err(AppError::InvalidInput(_))
        ));

        service.add_source(source("b", 1)).await.unwrap();
        let ids: Vec<String> = service.list_sources().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert_eq!(service.remove_source("a").await.unwrap().id, "a");
        assert!(matches!(service.remove_source("a").await, Err(AppError::NotFound(_))));
        assert!(service.source_metrics("a").await.is_none());
    }

    #[tokio::test]
    async fn tick_dispatches_due_sources_once() {
        let service = service(10);
        service.add_source(source("docs", 2)).await.unwrap();

        let before = Utc::now();
        assert_eq!(service.run_scheduler_tick().await, 1);
        let docs = service.get_source("docs").await.unwrap();
        assert_eq!(docs.status, SourceStatus::Active);
        assert!(docs.last_crawl.is_some());
        assert!(docs.next_crawl >= before + chrono::Duration::seconds(3599));

        // Not due again until the interval passes
        assert_eq!(service.run_scheduler_tick().await, 0);
        assert_eq!(service.crawler().queue_status().await.queued_jobs, 2);
        assert_eq!(service.source_metrics("docs").await.unwrap().jobs_submitted, 2);
    }

    #[tokio::test]
    async fn overlapping_ticks_dispatch_a_source_once() {
        let service = service(10);
        service.add_source(source("docs", 2)).await.unwrap();

        let (first, second) = tokio::join!(service.run_scheduler_tick(), service.run_scheduler_tick());
        assert_eq!(first + second, 1);
        assert_eq!(service.crawler().queue_status().await.queued_jobs, 2);
        assert_eq!(service.source_metrics("docs").await.unwrap().crawls_dispatched, 1);
    }

    #[tokio::test]
    async fn full_queue_puts_source_in_error_with_doubled_interval() {
        let service = service(1);
        service.add_source(source("big", 3)).await.unwrap();

        let before = Utc::now();
        assert_eq!(service.run_scheduler_tick().await, 0);
        let big = service.get_source("big").await.unwrap();
        assert_eq!(big.status, SourceStatus::Error);
        assert!(big.last_error.unwrap().contains("Queue is full"));
        assert!(big.next_crawl >= before + chrono::Duration::seconds(7199));

        let report = service.health_check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.error_sources, vec!["big".to_string()]);
    }

    #[tokio::test]
    async fn paused_sources_are_skipped_until_resumed() {
        let service = service(10);
        service.add_source(source("p", 1)).await.unwrap();
        service.pause_source("p").await.unwrap();
        assert_eq!(service.run_scheduler_tick().await, 0);

        service.resume_source("p").await.unwrap();
        assert_eq!(service.run_scheduler_tick().await, 1);
        assert!(matches!(service.pause_source("missing").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn metrics_count_sources_by_status() {
        let service = service(10);
        service.add_source(source("a", 1)).await.unwrap();
        service.add_source(source("b", 1)).await.unwrap();
        service.pause_source("b").await.unwrap();

        let metrics = service.update_metrics().await;
        assert_eq!(metrics.total_sources, 2);
        assert_eq!(metrics.active_sources, 1);
        assert_eq!(metrics.paused_sources, 1);
        assert_eq!(service.metrics().await, metrics);

        let report = service.health_check().await;
        assert!(report.is_healthy());
        assert!(!report.crawler_running);
    }
}
