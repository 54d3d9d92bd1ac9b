pub mod auth;
pub mod config;
pub mod google;
pub mod upload;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

pub use google::GoogleDriveStorage;
pub use upload::{UploadResult, Uploader};

/// A file created on the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoredFile {
    pub id: String,
    #[serde(rename = "webViewLink", default)]
    pub web_view_link: Option<String>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected the access token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("storage request failed: {0}")]
    Request(String),
}

/// Remote storage that can hold a file and hand out a public read link.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Makes sure a usable credential is cached. `force` discards the cached
    /// one first.
    async fn refresh_credentials(&self, force: bool) -> Result<(), StorageError>;

    async fn create_file(
        &self,
        name: &str,
        folder_id: Option<&str>,
        mime_type: &str,
        content: Bytes,
    ) -> Result<StoredFile, StorageError>;

    /// Grants read access to anyone holding the link.
    async fn share_publicly(&self, file_id: &str) -> Result<(), StorageError>;

    async fn shareable_link(&self, file: &StoredFile) -> Result<String, StorageError>;

    /// Removes a file, including any permissions granted on it.
    async fn delete_file(&self, file_id: &str) -> Result<(), StorageError>;
}
