pub mod local_storage;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::document::Document;

pub use local_storage::LocalStorageClient;

/// Persists documents; returns the id they were stored under.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    async fn store_document(&self, document: &Document) -> Result<String>;
}
