use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::config::settings::SourceDefinition;
use crate::domain::job::{CrawlJob, CrawlScope};
use crate::utils::error::{AppError, Result};
use crate::utils::urls;

const MAX_CRAWL_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Paused,
    Error,
    Disabled,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceStatus::Active => "active",
            SourceStatus::Paused => "paused",
            SourceStatus::Error => "error",
            SourceStatus::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub priority: i32,
    pub follow_links: bool,
    pub max_depth: u32,
    pub same_domain_only: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Copied onto every job generated for the source.
    pub metadata: HashMap<String, String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            priority: 0,
            follow_links: false,
            max_depth: 0,
            same_domain_only: true,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingSource {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub domain: String,
    pub start_urls: Vec<String>,
    pub crawl_interval: Duration,
    pub status: SourceStatus,
    pub last_crawl: Option<DateTime<Utc>>,
    pub next_crawl: DateTime<Utc>,
    pub last_error: Option<String>,
    pub source_config: SourceConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScrapingSource {
    /// A source that is due immediately.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
        start_urls: Vec<String>,
        crawl_interval: Duration,
    ) -> Self {
        let now = Utc::now();
        let base_url = base_url.into();
        let domain = urls::extract_domain(&base_url).unwrap_or_default();
        Self {
            id: id.into(),
            name: name.into(),
            base_url,
            domain,
            start_urls,
            crawl_interval,
            status: SourceStatus::Active,
            last_crawl: None,
            next_crawl: now,
            last_error: None,
            source_config: SourceConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_config(mut self, source_config: SourceConfig) -> Self {
        self.source_config = source_config;
        self
    }

    /// Reject definitions the scheduler could not turn into jobs.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::InvalidInput("Source id must not be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidInput(format!("Source {} has an empty name", self.id)));
        }
        if self.base_url.trim().is_empty() {
            return Err(AppError::InvalidInput(format!("Source {} has an empty base URL", self.id)));
        }
        urls::parse_http_url(&self.base_url)?;
        if self.start_urls.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "Source {} needs at least one start URL",
                self.id
            )));
        }
        for start_url in &self.start_urls {
            urls::parse_http_url(start_url)?;
        }
        if self.crawl_interval.is_zero() || self.crawl_interval > MAX_CRAWL_INTERVAL {
            return Err(AppError::InvalidInput(format!(
                "Source {} has an out-of-range crawl interval: {:?}",
                self.id, self.crawl_interval
            )));
        }
        for pattern in self
            .source_config
            .include_patterns
            .iter()
            .chain(self.source_config.exclude_patterns.iter())
        {
            Regex::new(pattern).map_err(|e| {
                AppError::InvalidInput(format!("Invalid URL pattern '{}' for source {}: {}", pattern, self.id, e))
            })?;
        }
        Ok(())
    }

    pub fn is_schedulable(&self) -> bool {
        matches!(self.status, SourceStatus::Active | SourceStatus::Error)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_schedulable() && self.next_crawl <= now
    }

    /// One job per start URL, tagged with the source.
    pub fn build_jobs(&self) -> Result<Vec<CrawlJob>> {
        let scope = (self.source_config.follow_links && self.source_config.max_depth > 0).then(|| CrawlScope {
            max_depth: self.source_config.max_depth,
            same_domain_only: self.source_config.same_domain_only,
            include_patterns: self.source_config.include_patterns.clone(),
            exclude_patterns: self.source_config.exclude_patterns.clone(),
        });

        self.start_urls
            .iter()
            .map(|start_url| {
                let mut job = CrawlJob::new(start_url)?
                    .with_source(self.id.clone())
                    .with_priority(self.source_config.priority)
                    .with_metadata("source_name", self.name.clone());
                for (key, value) in &self.source_config.metadata {
                    job.metadata.entry(key.clone()).or_insert_with(|| value.clone());
                }
                if let Some(scope) = &scope {
                    job = job.with_scope(scope.clone());
                }
                Ok(job)
            })
            .collect()
    }

    /// Push `next_crawl` one interval out while a dispatch is in flight.
    pub fn claim(&mut self, now: DateTime<Utc>) {
        self.next_crawl = advance(now, self.crawl_interval);
    }

    pub fn mark_crawled(&mut self, now: DateTime<Utc>) {
        self.status = SourceStatus::Active;
        self.last_crawl = Some(now);
        self.next_crawl = advance(now, self.crawl_interval);
        self.last_error = None;
        self.updated_at = now;
    }

    /// Error status and a doubled interval before the next attempt.
    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: String) {
        self.status = SourceStatus::Error;
        self.next_crawl = advance(now, self.crawl_interval.saturating_mul(2));
        self.last_error = Some(error);
        self.updated_at = now;
    }
}

impl From<&SourceDefinition> for ScrapingSource {
    fn from(definition: &SourceDefinition) -> Self {
        ScrapingSource::new(
            definition.id.clone(),
            definition.name.clone(),
            definition.base_url.clone(),
            definition.start_urls.clone(),
            Duration::from_secs(definition.crawl_interval_secs),
        )
        .with_config(SourceConfig {
            priority: definition.priority,
            follow_links: definition.follow_links,
            max_depth: definition.max_depth,
            same_domain_only: true,
            include_patterns: definition.include_patterns.clone(),
            exclude_patterns: definition.exclude_patterns.clone(),
            metadata: definition.metadata.clone(),
        })
    }
}

fn advance(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> ScrapingSource {
        ScrapingSource::new(
            "docs",
            "Docs",
            "https://docs.example.org",
            vec![
                "https://docs.example.org/a".to_string(),
                "https://docs.example.org/b".to_string(),
            ],
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn validation_rejects_missing_fields() {
        assert!(source().validate().is_ok());

        let mut s = source();
        s.start_urls.clear();
        assert!(matches!(s.validate(), Err(AppError::InvalidInput(_))));

        let mut s = source();
        s.name = "  ".into();
        assert!(s.validate().is_err());

        let mut s = source();
        s.base_url = "not a url".into();
        assert!(s.validate().is_err());

        let mut s = source();
        s.source_config.include_patterns = vec!["(unclosed".into()];
        assert!(s.validate().is_err());
    }

    #[test]
    fn builds_one_tagged_job_per_start_url() {
        let jobs = source().build_jobs().unwrap();
        assert_eq!(jobs.len(), 2);
        for job in &jobs {
            assert_eq!(job.source_id.as_deref(), Some("docs"));
            assert_eq!(job.metadata.get("source_name").map(String::as_str), Some("Docs"));
            assert!(job.scope.is_none());
        }
    }

    #[test]
    fn failure_doubles_the_interval() {
        let mut s = source();
        let now = Utc::now();
        s.mark_failed(now, "queue full".into());
        assert_eq!(s.status, SourceStatus::Error);
        assert_eq!(s.next_crawl, now + chrono::Duration::hours(2));
        assert!(s.is_schedulable());

        s.mark_crawled(now);
        assert_eq!(s.status, SourceStatus::Active);
        assert_eq!(s.next_crawl, now + chrono::Duration::hours(1));
        assert_eq!(s.last_crawl, Some(now));
    }

    #[test]
    fn paused_sources_are_never_due() {
        let mut s = source();
        s.status = SourceStatus::Paused;
        assert!(!s.is_due(Utc::now() + chrono::Duration::days(1)));
    }
}
