//! Object-store abstraction: flat bucket/key blobs with eventual-consistency
//! LIST and atomic whole-object PUT/GET/DELETE/COPY.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

pub const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("{op} {key}: {message}")]
    Backend {
        op: &'static str,
        key: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whole-object PUT with an explicit content length.
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Ranged GET of `bytes=offset..offset+len-1`.
    async fn get_range(&self, key: &str, offset: u64, len: u64) -> Result<Vec<u8>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError>;

    /// All keys sharing `prefix`, in key order. No delimiter folding; the
    /// namespace view reconstructs the hierarchy itself.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError>;

    /// Presence probe. `Ok(None)` means the key does not exist.
    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, StoreError>;
}
