use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::settings::Validator as ValidatorSettings;
use crate::infrastructure::validator::{QualityReport, QualityValidator};
use crate::utils::error::AppError;

#[derive(Serialize)]
struct ValidationRequest<'a> {
    text: &'a str,
    metadata: &'a serde_json::Value,
}

/// Client for an external scoring service that answers
/// `POST {endpoint}` with a `QualityReport` JSON body.
pub struct RemoteQualityValidator {
    client: HttpClient,
    endpoint: String,
}

impl RemoteQualityValidator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)
            .map_err(|e| AppError::Validation(format!("Invalid validator endpoint {}: {}", endpoint, e)))?;

        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// `None` when no endpoint is configured.
    pub fn from_settings(settings: &ValidatorSettings) -> Result<Option<Self>> {
        settings
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, Duration::from_secs(settings.timeout_secs)))
            .transpose()
    }
}

#[async_trait]
impl QualityValidator for RemoteQualityValidator {
    async fn validate_content(&self, text: &str, metadata: &serde_json::Value) -> Result<QualityReport> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ValidationRequest { text, metadata })
            .send()
            .await
            .map_err(|e| AppError::Validation(format!("Validation request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Validation(format!("Validator returned {}", status)).into());
        }

        let mut report: QualityReport = response
            .json()
            .await
            .map_err(|e| AppError::Validation(format!("Malformed validator response: {}", e)))?;
        report.overall_score = report.overall_score.clamp(0.0, 1.0);

        debug!(score = report.overall_score, tier = %report.quality_tier, "Content validated");
        Ok(report)
    }
}
