use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::compliance::ComplianceDecision;
use crate::domain::document::Document;
use crate::utils::error::Result;
use crate::utils::urls;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Rules for turning a page's links into follow-up jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlScope {
    pub max_depth: u32,
    pub same_domain_only: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: Uuid,
    pub url: String,
    pub domain: String,
    pub depth: u32,
    pub priority: i32,
    pub source_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub scope: Option<CrawlScope>,
}

impl CrawlJob {
    /// Build a pending job; fails on a URL that is not http(s).
    pub fn new(url: &str) -> Result<Self> {
        let url = urls::normalize_url(url)?;
        let domain = urls::extract_domain(&url)?;
        Ok(Self {
            id: Uuid::new_v4(),
            url,
            domain,
            depth: 0,
            priority: 0,
            source_id: None,
            metadata: HashMap::new(),
            status: JobStatus::Pending,
            attempt_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
            scope: None,
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        let source_id = source_id.into();
        self.metadata.insert("source_id".to_string(), source_id.clone());
        self.source_id = Some(source_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_scope(mut self, scope: CrawlScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        self.attempt_count += 1;
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.last_error = None;
    }

    pub fn fail(&mut self, error_message: String) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.last_error = Some(error_message);
    }

    /// Put a failed attempt back to pending for another try.
    pub fn requeue(&mut self, error_message: String) {
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.last_error = Some(error_message);
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    /// Child job for a link discovered on this job's page.
    pub fn child(&self, url: &str) -> Result<Self> {
        let mut child = CrawlJob::new(url)?
            .with_depth(self.depth + 1)
            .with_priority(self.priority);
        child.source_id = self.source_id.clone();
        child.metadata = self.metadata.clone();
        child.metadata.insert("parent_url".to_string(), self.url.clone());
        child.scope = self.scope.clone();
        Ok(child)
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PolicyDenied,
    RateLimited,
    Extraction,
    Validation,
    BelowQualityThreshold,
    Timeout,
    Panicked,
    Cancelled,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::RateLimited | FailureKind::Extraction | FailureKind::Timeout | FailureKind::Panicked
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub job_id: Uuid,
    pub url: String,
    pub domain: String,
    pub worker_id: usize,
    pub success: bool,
    pub document: Option<Document>,
    pub quality_score: f64,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub status_code: Option<u16>,
    pub extracted_links: Vec<String>,
    pub compliance_decision: Option<ComplianceDecision>,
    pub processing_time: Duration,
}

impl CrawlResult {
    pub fn new(job: &CrawlJob, worker_id: usize) -> Self {
        Self {
            job_id: job.id,
            url: job.url.clone(),
            domain: job.domain.clone(),
            worker_id,
            success: false,
            document: None,
            quality_score: 0.0,
            error: None,
            failure: None,
            status_code: None,
            extracted_links: Vec::new(),
            compliance_decision: None,
            processing_time: Duration::ZERO,
        }
    }

    pub fn failed(mut self, kind: FailureKind, error: impl Into<String>) -> Self {
        self.success = false;
        self.failure = Some(kind);
        self.error = Some(error.into());
        self
    }
}
