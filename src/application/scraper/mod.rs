pub mod crawler;
pub mod links;
pub mod metrics;
pub mod processor;
pub mod worker;

pub use crawler::{CrawlerConfig, DistributedCrawler};
pub use metrics::{CrawlMetrics, DomainStats, QueueStatus, WorkerStats};
