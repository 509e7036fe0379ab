pub mod compliance;
pub mod rate_limit;
pub mod scheduler;
pub mod scraper;
