pub mod http_extractor;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::domain::document::Document;

pub use http_extractor::{ExtractorConfig, HttpContentExtractor};

/// Outcome of fetching and extracting one URL.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub document: Option<Document>,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error: Option<String>,
    pub processing_time: Duration,
}

impl ExtractionResult {
    pub fn extracted(document: Document, processing_time: Duration) -> Self {
        Self {
            status_code: Some(document.status_code),
            document: Some(document),
            success: true,
            error: None,
            processing_time,
        }
    }

    pub fn failed(status_code: Option<u16>, error: impl Into<String>, processing_time: Duration) -> Self {
        Self {
            document: None,
            status_code,
            success: false,
            error: Some(error.into()),
            processing_time,
        }
    }
}

/// Fetches a page and turns it into a `Document`.
///
/// An `Err` means the extractor itself broke; an unsuccessful
/// `ExtractionResult` means the page could not be extracted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract_content(&self, url: &str) -> Result<ExtractionResult>;
}
