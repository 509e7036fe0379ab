use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use fortai_corpus_crawler::application::compliance::{ComplianceConfig, ComplianceEngine};
use fortai_corpus_crawler::application::rate_limit::{AdaptiveRateLimiter, RateLimiterConfig};
use fortai_corpus_crawler::application::scheduler::{ScrapingService, ServiceConfig};
use fortai_corpus_crawler::application::scraper::{CrawlerConfig, DistributedCrawler};
use fortai_corpus_crawler::config::settings::AppConfig;
use fortai_corpus_crawler::domain::source::ScrapingSource;
use fortai_corpus_crawler::infrastructure::extractor::{ContentExtractor, ExtractorConfig, HttpContentExtractor};
use fortai_corpus_crawler::infrastructure::storage::{DocumentStorage, LocalStorageClient};
use fortai_corpus_crawler::infrastructure::validator::{QualityValidator, RemoteQualityValidator};
use fortai_corpus_crawler::utils::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    logging::init_tracing(&config.logging);
    info!("Starting corpus crawler service");

    let extractor: Arc<dyn ContentExtractor> =
        Arc::new(HttpContentExtractor::new(ExtractorConfig::from(&config.extractor))?);
    info!("HTTP extractor initialized");

    let validator = RemoteQualityValidator::from_settings(&config.validator)?
        .map(|validator| Arc::new(validator) as Arc<dyn QualityValidator>);
    match &config.validator.endpoint {
        Some(endpoint) => info!("Quality validator at {}", endpoint),
        None => info!("No quality validator configured, using neutral scores"),
    }

    let storage: Arc<dyn DocumentStorage> = Arc::new(LocalStorageClient::from_config(&config.storage));
    info!("Storing documents under {}", config.storage.root_dir);

    let compliance = Arc::new(ComplianceEngine::new(ComplianceConfig::from(&config.compliance))?);
    let rate_limiter = Arc::new(AdaptiveRateLimiter::new(RateLimiterConfig::from(&config.rate_limiter)));

    let crawler = Arc::new(DistributedCrawler::new(
        CrawlerConfig::from(&config.crawler),
        compliance,
        rate_limiter,
        extractor,
        validator,
        Some(storage),
    ));

    let service = Arc::new(ScrapingService::new(ServiceConfig::from(&config.service), crawler));
    for definition in &config.sources {
        if let Err(e) = service.add_source(ScrapingSource::from(definition)).await {
            warn!("Skipping source {}: {}", definition.id, e);
        }
    }
    info!("{} sources registered", service.list_sources().await.len());

    service.start().await?;
    info!("Service running, press Ctrl-C to stop");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let unprocessed = service.stop().await;
    if unprocessed.is_empty() {
        info!("Shutdown complete");
    } else {
        warn!("Shutdown complete with {} unprocessed jobs", unprocessed.len());
        for job in &unprocessed {
            info!(job_id = %job.id, url = %job.url, status = %job.status, "Unprocessed job");
        }
    }

    Ok(())
}
