mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use fortai_corpus_crawler::application::scheduler::{HealthStatus, ScrapingService, ServiceConfig};
use fortai_corpus_crawler::application::scraper::{CrawlerConfig, DistributedCrawler};
use fortai_corpus_crawler::domain::source::{ScrapingSource, SourceStatus};
use fortai_corpus_crawler::infrastructure::extractor::{ExtractorConfig, HttpContentExtractor};

use common::{compliance_engine, eventually, fast_limiter, local_compliance, ROBOTS_PUBLIC_ONLY};

fn service(scheduler_interval: Duration) -> Arc<ScrapingService> {
    let crawler = DistributedCrawler::new(
        CrawlerConfig {
            worker_count: 2,
            job_queue_size: 50,
            result_queue_size: 50,
            job_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(10),
            ..Default::default()
        },
        compliance_engine(local_compliance()),
        fast_limiter(),
        Arc::new(HttpContentExtractor::new(ExtractorConfig::default()).unwrap()),
        None,
        None,
    );
    Arc::new(ScrapingService::new(
        ServiceConfig {
            scheduler_interval,
            health_check_interval: Duration::from_secs(3600),
            metrics_interval: Duration::from_secs(3600),
            ..Default::default()
        },
        Arc::new(crawler),
    ))
}

async fn robots_server() -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/robots.txt")
        .with_status(200)
        .with_body(ROBOTS_PUBLIC_ONLY)
        .create_async()
        .await;
    server
        .mock("GET", "/public/start.html")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><head><title>Start</title></head><body><p>Dataset landing page</p></body></html>")
        .create_async()
        .await;
    server
}

fn hourly_source(server: &mockito::ServerGuard) -> ScrapingSource {
    ScrapingSource::new(
        "local-docs",
        "Local docs",
        server.url(),
        vec![format!("{}/public/start.html", server.url())],
        Duration::from_secs(3600),
    )
}

#[tokio::test]
async fn one_tick_submits_one_job_per_start_url_and_reschedules() {
    let server = robots_server().await;
    let service = service(Duration::from_secs(3600));
    service.add_source(hourly_source(&server)).await.unwrap();

    let before = Utc::now();
    assert_eq!(service.run_scheduler_tick().await, 1);

    let source = service.get_source("local-docs").await.unwrap();
    assert_eq!(source.status, SourceStatus::Active);
    let until_next = source.next_crawl - before;
    assert!(until_next >= chrono::Duration::seconds(3590) && until_next <= chrono::Duration::seconds(3610));

    // Not due again
    assert_eq!(service.run_scheduler_tick().await, 0);

    let stats = service.source_metrics("local-docs").await.unwrap();
    assert_eq!(stats.crawls_dispatched, 1);
    assert_eq!(stats.jobs_submitted, 1);

    // Crawler never started: the job is still queued
    let queued = service.crawler().stop().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].source_id.as_deref(), Some("local-docs"));
    assert!(queued[0].url.ends_with("/public/start.html"));
}

#[tokio::test]
async fn running_service_crawls_due_sources() {
    let server = robots_server().await;
    let service = service(Duration::from_millis(50));
    service.add_source(hourly_source(&server)).await.unwrap();
    service.start().await.unwrap();

    assert!(
        eventually(Duration::from_secs(10), || async {
            service.update_metrics().await.total_documents == 1
        })
        .await
    );

    let metrics = service.update_metrics().await;
    assert_eq!(metrics.total_sources, 1);
    assert_eq!(metrics.active_sources, 1);
    assert_eq!(metrics.failed_jobs, 0);
    assert_eq!(metrics.success_rate, 1.0);
    assert!(metrics.throttled_domains >= 1);

    let health = service.health_check().await;
    assert_eq!(health.status, HealthStatus::Ok);
    assert!(health.crawler_running);

    assert!(service.stop().await.is_empty());
    assert!(!service.crawler().is_running().await);
    // Stopping twice is harmless
    assert!(service.stop().await.is_empty());
}

#[tokio::test]
async fn paused_sources_are_skipped_until_resumed() {
    let server = robots_server().await;
    let service = service(Duration::from_secs(3600));
    service.add_source(hourly_source(&server)).await.unwrap();

    service.pause_source("local-docs").await.unwrap();
    assert_eq!(service.run_scheduler_tick().await, 0);
    assert_eq!(service.update_metrics().await.paused_sources, 1);

    service.resume_source("local-docs").await.unwrap();
    assert_eq!(service.run_scheduler_tick().await, 1);
    assert_eq!(service.crawler().stop().await.len(), 1);
}
