mod common;

use async_trait::async_trait;
use mockall::mock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fortai_corpus_crawler::application::compliance::ComplianceConfig;
use fortai_corpus_crawler::application::scraper::{CrawlerConfig, DistributedCrawler};
use fortai_corpus_crawler::domain::document::Document;
use fortai_corpus_crawler::domain::job::{CrawlJob, CrawlScope, FailureKind, JobStatus};
use fortai_corpus_crawler::infrastructure::extractor::{
    ContentExtractor, ExtractionResult, ExtractorConfig, HttpContentExtractor,
};
use fortai_corpus_crawler::infrastructure::storage::{DocumentStorage, LocalStorageClient};
use fortai_corpus_crawler::infrastructure::validator::{QualityReport, QualityValidator};

use common::{compliance_engine, eventually, fast_limiter, local_compliance, ROBOTS_PUBLIC_ONLY};

mock! {
    pub Extractor {}

    #[async_trait]
    impl ContentExtractor for Extractor {
        async fn extract_content(&self, url: &str) -> anyhow::Result<ExtractionResult>;
    }
}

mock! {
    pub Validator {}

    #[async_trait]
    impl QualityValidator for Validator {
        async fn validate_content(&self, text: &str, metadata: &serde_json::Value) -> anyhow::Result<QualityReport>;
    }
}

mock! {
    pub Storage {}

    #[async_trait]
    impl DocumentStorage for Storage {
        async fn store_document(&self, document: &Document) -> anyhow::Result<String>;
    }
}

/// Holds every request until the crawler gives up on it.
struct StalledExtractor;

#[async_trait]
impl ContentExtractor for StalledExtractor {
    async fn extract_content(&self, _url: &str) -> anyhow::Result<ExtractionResult> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        anyhow::bail!("unreachable")
    }
}

/// Panics on every call, counting how often it was reached.
#[derive(Default)]
struct PanickingExtractor {
    calls: AtomicUsize,
}

#[async_trait]
impl ContentExtractor for PanickingExtractor {
    async fn extract_content(&self, _url: &str) -> anyhow::Result<ExtractionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("parser blew up")
    }
}

/// Blocks every store until the test opens the gate.
struct GatedStorage {
    gate: tokio::sync::Semaphore,
    stored: AtomicUsize,
}

impl GatedStorage {
    fn closed() -> Self {
        Self {
            gate: tokio::sync::Semaphore::new(0),
            stored: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentStorage for GatedStorage {
    async fn store_document(&self, document: &Document) -> anyhow::Result<String> {
        let _open = self.gate.acquire().await?;
        self.stored.fetch_add(1, Ordering::SeqCst);
        Ok(document.id.to_string())
    }
}

/// No robots.txt lookups; example.org passes the terms check.
fn offline_compliance() -> ComplianceConfig {
    ComplianceConfig {
        respect_robots_txt: false,
        default_crawl_delay: Duration::ZERO,
        trusted_domains: vec!["example.org".to_string()],
        ..Default::default()
    }
}

fn page(url: &str, body: &str) -> ExtractionResult {
    let domain = url::Url::parse(url).unwrap().host_str().unwrap().to_string();
    let document = Document::new(url.to_string(), domain, body.to_string(), 200);
    ExtractionResult::extracted(document, Duration::from_millis(5))
}

fn config() -> CrawlerConfig {
    CrawlerConfig {
        worker_count: 2,
        job_queue_size: 100,
        result_queue_size: 100,
        job_timeout: Duration::from_secs(10),
        quality_threshold: 0.5,
        retry_attempts: 1,
        retry_delay: Duration::from_millis(10),
        max_tracked_urls: 1000,
    }
}

#[tokio::test]
async fn crawls_public_pages_follows_links_and_stores_documents() {
    let mut server = mockito::Server::new_async().await;
    let _robots = server
        .mock("GET", "/robots.txt")
        .with_status(200)
        .with_body(ROBOTS_PUBLIC_ONLY)
        .create_async()
        .await;
    let index = server
        .mock("GET", "/public/index.html")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(
            r#"<html><head><title>Index</title></head><body>
               <p>Welcome to the public corpus</p>
               <a href="/public/next.html">next</a>
               <a href="/admin/secret">secret</a>
               <a href="https://elsewhere.example/page">offsite</a>
               </body></html>"#,
        )
        .expect(1)
        .create_async()
        .await;
    let next = server
        .mock("GET", "/public/next.html")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><body><p>The second page</p></body></html>")
        .expect(1)
        .create_async()
        .await;
    let admin = server.mock("GET", "/admin/secret").expect(0).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn DocumentStorage> = Arc::new(LocalStorageClient::new(dir.path()));
    let crawler = DistributedCrawler::new(
        config(),
        compliance_engine(local_compliance()),
        fast_limiter(),
        Arc::new(HttpContentExtractor::new(ExtractorConfig::default()).unwrap()),
        None,
        Some(storage),
    );

    let start = CrawlJob::new(&format!("{}/public/index.html", server.url()))
        .unwrap()
        .with_source("local")
        .with_scope(CrawlScope {
            max_depth: 1,
            same_domain_only: true,
            include_patterns: vec![],
            exclude_patterns: vec![],
        });
    crawler.submit_job(start).await.unwrap();
    crawler.start().await.unwrap();

    // index + next complete; the linked admin page is denied
    assert!(
        eventually(Duration::from_secs(10), || async {
            let metrics = crawler.metrics().await;
            metrics.jobs_completed == 2 && metrics.jobs_failed == 1
        })
        .await,
        "crawl did not settle: {:?}",
        crawler.metrics().await
    );

    let unprocessed = crawler.stop().await;
    assert!(unprocessed.is_empty());

    index.assert_async().await;
    next.assert_async().await;
    admin.assert_async().await;

    let metrics = crawler.metrics().await;
    assert_eq!(metrics.documents_stored, 2);
    assert_eq!(metrics.policy_denials, 1);
    assert_eq!(metrics.links_enqueued, 2);
    assert_eq!(metrics.jobs_retried, 0);
    assert!((metrics.average_quality_score - 0.5).abs() < 1e-9);
    assert_eq!(metrics.domain_stats["127.0.0.1"].attempts, 3);

    let mut stored = tokio::fs::read_dir(dir.path().join("local")).await.unwrap();
    let mut files = 0;
    while stored.next_entry().await.unwrap().is_some() {
        files += 1;
    }
    assert_eq!(files, 2);
}

#[tokio::test]
async fn low_quality_documents_fail_without_retry_or_storage() {
    let mut extractor = MockExtractor::new();
    extractor
        .expect_extract_content()
        .times(1)
        .returning(|url| Ok(page(url, "thin content")));

    let mut validator = MockValidator::new();
    validator.expect_validate_content().times(1).returning(|_, _| {
        Ok(QualityReport {
            overall_score: 0.2,
            quality_tier: "low".to_string(),
            dimensions: HashMap::new(),
        })
    });

    let mut storage = MockStorage::new();
    storage.expect_store_document().never();

    let crawler = DistributedCrawler::new(
        config(),
        compliance_engine(offline_compliance()),
        fast_limiter(),
        Arc::new(extractor),
        Some(Arc::new(validator)),
        Some(Arc::new(storage)),
    );
    crawler.start().await.unwrap();
    crawler
        .submit_job(CrawlJob::new("https://example.org/thin").unwrap())
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(5), || async { crawler.metrics().await.jobs_failed == 1 }).await);
    crawler.stop().await;

    let metrics = crawler.metrics().await;
    assert_eq!(metrics.below_quality_threshold, 1);
    assert_eq!(metrics.jobs_retried, 0);
    assert!((metrics.average_quality_score - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn panicking_extractor_is_retried_then_failed() {
    let extractor = Arc::new(PanickingExtractor::default());

    let crawler = DistributedCrawler::new(
        config(),
        compliance_engine(offline_compliance()),
        fast_limiter(),
        extractor.clone(),
        None,
        None,
    );
    crawler.start().await.unwrap();
    crawler
        .submit_job(CrawlJob::new("https://example.org/fragile").unwrap())
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(5), || async { crawler.metrics().await.jobs_failed == 1 }).await);
    let metrics = crawler.metrics().await;
    assert_eq!(metrics.attempts, 2);
    assert_eq!(metrics.jobs_retried, 1);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);

    // Workers survived the panics
    assert!(crawler.queue_status().await.running);
    assert!(crawler.stop().await.is_empty());
}

#[tokio::test]
async fn extraction_errors_are_retried_until_success() {
    let mut extractor = MockExtractor::new();
    let mut seq = mockall::Sequence::new();
    extractor
        .expect_extract_content()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(ExtractionResult::failed(Some(503), "HTTP error: 503", Duration::ZERO)));
    extractor
        .expect_extract_content()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|url| Ok(page(url, "recovered content")));

    let crawler = DistributedCrawler::new(
        config(),
        compliance_engine(offline_compliance()),
        fast_limiter(),
        Arc::new(extractor),
        None,
        None,
    );
    crawler.start().await.unwrap();
    crawler
        .submit_job(CrawlJob::new("https://example.org/flaky").unwrap())
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(5), || async { crawler.metrics().await.jobs_completed == 1 }).await);
    crawler.stop().await;

    let metrics = crawler.metrics().await;
    assert_eq!(metrics.jobs_failed, 0);
    assert_eq!(metrics.jobs_retried, 1);
    assert_eq!(metrics.domain_stats["example.org"].failures, 1);
}

#[tokio::test]
async fn denied_urls_never_reach_the_extractor() {
    let mut extractor = MockExtractor::new();
    extractor.expect_extract_content().never();

    let crawler = DistributedCrawler::new(
        config(),
        compliance_engine(ComplianceConfig {
            blocked_domains: vec!["example.org".to_string()],
            ..offline_compliance()
        }),
        fast_limiter(),
        Arc::new(extractor),
        None,
        None,
    );
    crawler.start().await.unwrap();
    crawler
        .submit_job(CrawlJob::new("https://example.org/blocked").unwrap())
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(5), || async { crawler.metrics().await.jobs_failed == 1 }).await);
    crawler.stop().await;
    assert_eq!(crawler.metrics().await.policy_denials, 1);
}

#[tokio::test]
async fn stop_hands_back_queued_and_interrupted_jobs() {
    let crawler = DistributedCrawler::new(
        CrawlerConfig {
            worker_count: 1,
            ..config()
        },
        compliance_engine(offline_compliance()),
        fast_limiter(),
        Arc::new(StalledExtractor),
        None,
        None,
    );
    crawler.start().await.unwrap();

    let jobs: Vec<CrawlJob> = (0..3)
        .map(|i| CrawlJob::new(&format!("https://example.org/slow/{}", i)).unwrap())
        .collect();
    let ids = crawler.submit_batch(jobs).await.unwrap();
    assert_eq!(ids.len(), 3);

    assert!(eventually(Duration::from_secs(5), || async { crawler.active_jobs().await.len() == 1 }).await);
    let status = crawler.queue_status().await;
    assert_eq!(status.queued_jobs, 2);
    assert_eq!(status.active_jobs, 1);

    let unprocessed = crawler.stop().await;
    assert_eq!(unprocessed.len(), 3);
    assert!(unprocessed.iter().all(|job| job.status == JobStatus::Pending));
    assert_eq!(unprocessed.iter().filter(|job| job.attempt_count == 1).count(), 1);
    assert!(!crawler.is_running().await);
}

#[tokio::test]
async fn submitting_past_capacity_fails_immediately() {
    let crawler = DistributedCrawler::new(
        CrawlerConfig {
            job_queue_size: 5,
            ..config()
        },
        compliance_engine(offline_compliance()),
        fast_limiter(),
        Arc::new(MockExtractor::new()),
        None,
        None,
    );

    let started = std::time::Instant::now();
    let mut rejected = 0;
    for i in 0..8 {
        if crawler
            .submit_job(CrawlJob::new(&format!("https://example.org/{}", i)).unwrap())
            .await
            .is_err()
        {
            rejected += 1;
        }
    }
    assert_eq!(rejected, 3);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(crawler.stop().await.len() == 5);
}

#[tokio::test]
async fn full_result_queue_drops_results_and_workers_keep_draining() {
    let mut extractor = MockExtractor::new();
    extractor
        .expect_extract_content()
        .times(5)
        .returning(|url| Ok(page(url, "content worth keeping")));
    let storage = Arc::new(GatedStorage::closed());

    let crawler = DistributedCrawler::new(
        CrawlerConfig {
            result_queue_size: 1,
            ..config()
        },
        compliance_engine(offline_compliance()),
        fast_limiter(),
        Arc::new(extractor),
        None,
        Some(storage.clone() as Arc<dyn DocumentStorage>),
    );
    crawler.start().await.unwrap();

    // One domain per job so per-domain throttling stays out of the way
    let jobs: Vec<CrawlJob> = (0..5)
        .map(|i| CrawlJob::new(&format!("https://n{}.example.org/page", i)).unwrap())
        .collect();
    crawler.submit_batch(jobs).await.unwrap();

    // The processor is stuck storing the first result and one more sits in
    // the result queue; the other three are dropped.
    assert!(
        eventually(Duration::from_secs(5), || async {
            let status = crawler.queue_status().await;
            crawler.metrics().await.dropped_results == 3 && status.queued_jobs == 0 && status.active_jobs == 1
        })
        .await,
        "results not dropped: {:?}",
        crawler.metrics().await
    );

    storage.gate.add_permits(10);
    assert!(eventually(Duration::from_secs(5), || async { crawler.metrics().await.jobs_completed == 2 }).await);

    assert!(crawler.stop().await.is_empty());
    let metrics = crawler.metrics().await;
    assert_eq!(metrics.documents_stored, 2);
    assert_eq!(metrics.jobs_failed, 0);
    assert_eq!(metrics.jobs_retried, 0);
    assert_eq!(storage.stored.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn jobs_over_the_timeout_are_retried_then_failed() {
    let crawler = DistributedCrawler::new(
        CrawlerConfig {
            job_timeout: Duration::from_millis(100),
            ..config()
        },
        compliance_engine(offline_compliance()),
        fast_limiter(),
        Arc::new(StalledExtractor),
        None,
        None,
    );
    crawler.start().await.unwrap();
    crawler
        .submit_job(CrawlJob::new("https://example.org/slow").unwrap())
        .await
        .unwrap();

    assert!(eventually(Duration::from_secs(5), || async { crawler.metrics().await.jobs_failed == 1 }).await);
    let metrics = crawler.metrics().await;
    assert_eq!(metrics.attempts, 2);
    assert_eq!(metrics.jobs_retried, 1);
    assert_eq!(metrics.failure_kinds.get(&FailureKind::Timeout), Some(&2));
    assert_eq!(metrics.domain_stats["example.org"].failures, 2);

    assert!(crawler.queue_status().await.running);
    assert!(crawler.stop().await.is_empty());
}
