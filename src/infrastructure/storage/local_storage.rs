use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::config::settings::Storage as StorageConfig;
use crate::domain::document::Document;
use crate::infrastructure::storage::DocumentStorage;
use crate::utils::error::AppError;

/// Writes each document as pretty JSON under a root directory.
pub struct LocalStorageClient {
    root: PathBuf,
}

impl LocalStorageClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.root_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generate_path(&self, document: &Document) -> PathBuf {
        // Hash of the URL avoids path issues
        let url_hash = format!("{:x}", md5::compute(document.url.as_bytes()));
        let folder = document
            .source_id
            .as_deref()
            .filter(|id| !id.is_empty() && !id.contains(|c: char| matches!(c, '/' | '\\' | '.')))
            .unwrap_or("unsourced");
        self.root.join(folder).join(format!("{}.json", url_hash))
    }
}

#[async_trait]
impl DocumentStorage for LocalStorageClient {
    async fn store_document(&self, document: &Document) -> Result<String> {
        let path = self.generate_path(document);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
        }

        let body = serde_json::to_vec_pretty(document)?;
        if let Err(e) = tokio::fs::write(&path, body).await {
            error!("Failed to write document {} to {}: {}", document.id, path.display(), e);
            return Err(AppError::Storage(format!("Failed to write {}: {}", path.display(), e)).into());
        }

        debug!("Stored document {} at {}", document.id, path.display());
        Ok(document.id.to_string())
    }
}
