pub mod health;
pub mod metrics;
pub mod service;

pub use health::{HealthReport, HealthStatus};
pub use metrics::{ServiceMetrics, SourceMetrics};
pub use service::{ScrapingService, ServiceConfig};
