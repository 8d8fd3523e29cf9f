//! In-memory store for local development and tests. Keys are held in a
//! sorted map so listings come back in key order like the real store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::storage::{ObjectInfo, ObjectStore, StoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    #[allow(dead_code)]
    content_type: Option<String>,
    modified: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    ops: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store calls issued so far. Lets tests assert that denied
    /// requests never reach the store.
    pub fn op_count(&self) -> u64 {
        self.ops.load(Ordering::SeqCst)
    }

    pub async fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.body.clone())
    }

    pub async fn insert_object(&self, key: &str, body: &[u8]) {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                content_type: None,
                modified: Utc::now(),
            },
        );
    }

    fn bump(&self) {
        self.ops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        self.bump();
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.map(str::to_string),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_range(&self, key: &str, offset: u64, len: u64) -> Result<Vec<u8>, StoreError> {
        self.bump();
        let objects = self.objects.read().await;
        let obj = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let start = (offset as usize).min(obj.body.len());
        let end = ((offset + len) as usize).min(obj.body.len());
        Ok(obj.body[start..end].to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.bump();
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
        self.bump();
        let mut objects = self.objects.write().await;
        let src = objects
            .get(from)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(from.to_string()))?;
        objects.insert(to.to_string(), src);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        self.bump();
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| ObjectInfo {
                key: k.clone(),
                size: o.body.len() as u64,
                modified: Some(o.modified),
            })
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, StoreError> {
        self.bump();
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|o| ObjectInfo {
            key: key.to_string(),
            size: o.body.len() as u64,
            modified: Some(o.modified),
        }))
    }
}
