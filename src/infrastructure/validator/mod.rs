pub mod remote_validator;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use remote_validator::RemoteQualityValidator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub overall_score: f64,
    pub quality_tier: String,
    #[serde(default)]
    pub dimensions: HashMap<String, f64>,
}

/// Scores extracted text; higher is better, in `[0, 1]`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QualityValidator: Send + Sync {
    async fn validate_content(&self, text: &str, metadata: &serde_json::Value) -> Result<QualityReport>;
}
