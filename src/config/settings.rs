use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Crawler {
    pub worker_count: usize,
    pub job_queue_size: usize,
    pub result_queue_size: usize,
    pub job_timeout_secs: u64,
    pub quality_threshold: f64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_tracked_urls: usize,
}

impl Default for Crawler {
    fn default() -> Self {
        Self {
            worker_count: 10,
            job_queue_size: 1000,
            result_queue_size: 1000,
            job_timeout_secs: 120,
            quality_threshold: 0.5,
            retry_attempts: 3,
            retry_delay_ms: 5000,
            max_tracked_urls: 100_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimiter {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_delay_ms: u64,
    pub max_concurrent_per_domain: usize,
    pub refill_interval_ms: u64,
    pub global_domain_burst: usize,
    pub global_refill_interval_ms: u64,
    pub wait_timeout_secs: u64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            min_delay_ms: 500,
            max_delay_ms: 60_000,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_delay_ms: 30_000,
            max_concurrent_per_domain: 2,
            refill_interval_ms: 1000,
            global_domain_burst: 20,
            global_refill_interval_ms: 100,
            wait_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Compliance {
    pub user_agent: String,
    pub respect_robots_txt: bool,
    pub robots_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub default_crawl_delay_ms: u64,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub enforce_allowlist: bool,
    pub trusted_domains: Vec<String>,
}

impl Default for Compliance {
    fn default() -> Self {
        Self {
            user_agent: "FortaiCorpusBot/1.0".to_string(),
            respect_robots_txt: true,
            robots_timeout_secs: 10,
            cache_ttl_secs: 24 * 60 * 60,
            default_crawl_delay_ms: 1000,
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            enforce_allowlist: false,
            trusted_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Extractor {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_page_size_bytes: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            user_agent: "FortaiCorpusBot/1.0".to_string(),
            request_timeout_secs: 30,
            max_page_size_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Service {
    pub scheduler_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub metrics_interval_secs: u64,
    pub max_concurrent_sources: usize,
    pub queue_warning_threshold: usize,
    pub idle_domain_ttl_secs: u64,
}

impl Default for Service {
    fn default() -> Self {
        Self {
            scheduler_interval_secs: 60,
            health_check_interval_secs: 300,
            metrics_interval_secs: 30,
            max_concurrent_sources: 5,
            queue_warning_threshold: 800,
            idle_domain_ttl_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Storage {
    pub root_dir: String,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            root_dir: "./data/documents".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Validator {
    /// Scoring endpoint; crawling proceeds with a neutral score when unset.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

/// A source declared in configuration, registered at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceDefinition {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub start_urls: Vec<String>,
    #[serde(default = "default_crawl_interval_secs")]
    pub crawl_interval_secs: u64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub follow_links: bool,
    #[serde(default)]
    pub max_depth: u32,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

fn default_crawl_interval_secs() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: Logging,
    pub crawler: Crawler,
    pub rate_limiter: RateLimiter,
    pub compliance: Compliance,
    pub extractor: Extractor,
    pub service: Service,
    pub storage: Storage,
    pub validator: Validator,
    pub sources: Vec<SourceDefinition>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| "./config".into());

        Self::from_sources(&config_dir, &run_mode)
    }

    pub fn from_sources(config_dir: &str, run_mode: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // APP__CRAWLER__WORKER_COUNT=4 overrides crawler.worker_count
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("compliance.allowed_domains")
                    .with_list_parse_key("compliance.blocked_domains")
                    .with_list_parse_key("compliance.trusted_domains")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}
