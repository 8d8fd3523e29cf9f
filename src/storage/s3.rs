//! S3 backend built on aws-sdk-s3. Credentials come from the environment;
//! a custom endpoint supports S3-compatible stores.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tokio::time::{Duration, sleep};

use crate::config::Config;
use crate::storage::{ObjectInfo, ObjectStore, StoreError};

const PUT_ATTEMPTS: u32 = 3;

pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub async fn new(config: &Config) -> Self {
        let mut loader = aws_config::ConfigLoader::default()
            .credentials_provider(
                aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
            )
            .region(aws_config::Region::new(config.s3_region.clone()));
        if let Some(endpoint) = &config.s3_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let conf = loader.load().await;
        Self {
            client: Client::new(&conf),
            bucket: config.s3_bucket.clone(),
        }
    }

    fn backend_err(op: &'static str, key: &str, err: impl std::fmt::Display) -> StoreError {
        StoreError::Backend {
            op,
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let req = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_length(body.len() as i64)
                .set_content_type(content_type.map(str::to_string))
                .body(body.clone().into());
            match req.send().await {
                Ok(_) => return Ok(()),
                Err(_e) if attempt < PUT_ATTEMPTS => {
                    sleep(Duration::from_millis(100 * attempt as u64)).await;
                    continue;
                }
                Err(e) => return Err(Self::backend_err("put", key, e)),
            }
        }
    }

    async fn get_range(&self, key: &str, offset: u64, len: u64) -> Result<Vec<u8>, StoreError> {
        let range = format!("bytes={}-{}", offset, offset + len - 1);
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(range)
            .send()
            .await
            .map_err(|e| {
                let msg = format!("{e}");
                if msg.contains("NoSuchKey") {
                    StoreError::NotFound(key.to_string())
                } else {
                    Self::backend_err("get", key, e)
                }
            })?;
        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| Self::backend_err("get", key, e))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::backend_err("delete", key, e))?;
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let source = format!("{}/{}", self.bucket, from);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(source)
            .key(to)
            .send()
            .await
            .map_err(|e| Self::backend_err("copy", from, e))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(t) = &token {
                req = req.continuation_token(t);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| Self::backend_err("list", prefix, e))?;
            for obj in resp.contents() {
                let Some(key) = obj.key() else { continue };
                out.push(ObjectInfo {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    modified: obj.last_modified().and_then(to_chrono),
                });
            }
            match resp.next_continuation_token() {
                Some(t) if resp.is_truncated() == Some(true) => token = Some(t.to_string()),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectInfo>, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => Ok(Some(ObjectInfo {
                key: key.to_string(),
                size: out.content_length().unwrap_or(0).max(0) as u64,
                modified: out.last_modified().and_then(to_chrono),
            })),
            Err(err) => {
                // Only a modeled service response can be a clean miss;
                // dispatch/timeout failures stay backend errors.
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Ok(None)
                } else {
                    Err(Self::backend_err("head", key, err))
                }
            }
        }
    }
}
