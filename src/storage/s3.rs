//! S3-compatible storage backend (spec §4.5), feature-gated behind `s3`.
//!
//! Maps operations to multipart PUT/GET/DELETE via `aws-sdk-s3`.
//! Versioning uses the remote bucket's native version IDs rather than the
//! local backend's synthetic ones.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::Utc;

use crate::error::StorageError;

use super::{compute_etag, ObjectDescriptor, ObjectPayload, ObjectStorage, PutOutcome, StorageResult, MAX_PRESIGN_TTL};

/// S3-compatible backend. `endpoint` is optional (unset targets AWS S3
/// directly; set for MinIO or another S3-compatible service).
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(bucket: String, endpoint: Option<String>, region: Option<String>) -> StorageResult<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let sdk_config = loader.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(s3_config_builder.build());
        Ok(Self { client, bucket })
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
        storage_class: Option<String>,
    ) -> StorageResult<PutOutcome> {
        let etag = compute_etag(&bytes);
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes));
        for (k, v) in &metadata {
            request = request.metadata(k, v);
        }
        if let Some(class) = storage_class {
            if let Ok(sc) = class.parse() {
                request = request.storage_class(sc);
            }
        }
        let output = request
            .send()
            .await
            .map_err(|e| StorageError::BackendUnavailable(e.to_string()))?;
        let version_id = output.version_id().unwrap_or_default().to_string();
        Ok(PutOutcome {
            version_id,
            etag,
            created_new_version: true,
        })
    }

    async fn get(&self, key: &str, version_id: Option<&str>) -> StorageResult<ObjectPayload> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(vid) = version_id {
            request = request.version_id(vid);
        }
        let output = request.send().await.map_err(|e| {
            if e.to_string().contains("NoSuchKey") {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::BackendUnavailable(e.to_string())
            }
        })?;
        let content_type = output.content_type().unwrap_or("application/octet-stream").to_string();
        let metadata: HashMap<String, String> = output.metadata().cloned().unwrap_or_default();
        let returned_version_id = output.version_id().unwrap_or_default().to_string();
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
            .into_bytes()
            .to_vec();
        let etag = compute_etag(&bytes);
        Ok(ObjectPayload {
            bytes,
            content_type,
            metadata,
            etag,
            version_id: returned_version_id,
        })
    }

    async fn delete(&self, key: &str, version_id: Option<&str>) -> StorageResult<()> {
        let mut request = self.client.delete_object().bucket(&self.bucket).key(key);
        if let Some(vid) = version_id {
            request = request.version_id(vid);
        }
        request
            .send()
            .await
            .map_err(|e| StorageError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str, limit: usize, offset: usize) -> StorageResult<Vec<ObjectDescriptor>> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys((limit + offset) as i32)
            .send()
            .await
            .map_err(|e| StorageError::BackendUnavailable(e.to_string()))?;
        let mut descriptors = Vec::new();
        for obj in output.contents().iter().skip(offset).take(limit) {
            descriptors.push(ObjectDescriptor {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0) as u64,
                etag: obj.e_tag().unwrap_or_default().trim_matches('"').to_string(),
                content_type: "application/octet-stream".to_string(),
                last_modified: obj
                    .last_modified()
                    .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), 0))
                    .unwrap_or_else(Utc::now),
            });
        }
        Ok(descriptors)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("NotFound") => Ok(false),
            Err(e) => Err(StorageError::BackendUnavailable(e.to_string())),
        }
    }

    async fn copy(&self, src_key: &str, dst_key: &str) -> StorageResult<()> {
        let source = format!("{}/{}", self.bucket, src_key);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(source)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| StorageError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn list_versions(&self, key: &str) -> StorageResult<Vec<crate::models::Version>> {
        let output = self
            .client
            .list_object_versions()
            .bucket(&self.bucket)
            .prefix(key)
            .send()
            .await
            .map_err(|e| StorageError::BackendUnavailable(e.to_string()))?;
        let mut versions: Vec<crate::models::Version> = output
            .versions()
            .iter()
            .filter(|v| v.key() == Some(key))
            .map(|v| crate::models::Version {
                object_key: key.to_string(),
                version_id: v.version_id().unwrap_or_default().to_string(),
                size: v.size().unwrap_or(0) as u64,
                etag: v.e_tag().unwrap_or_default().trim_matches('"').to_string(),
                is_latest: v.is_latest().unwrap_or(false),
                created_by: None,
                comment: None,
                tags: vec![],
                created_at: v
                    .last_modified()
                    .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), 0))
                    .unwrap_or_else(Utc::now),
            })
            .collect();
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(versions)
    }

    async fn url(&self, key: &str, expires_in: Option<Duration>) -> StorageResult<String> {
        let ttl = expires_in.unwrap_or(Duration::from_secs(3600)).min(MAX_PRESIGN_TTL);
        let config = PresigningConfig::expires_in(ttl).map_err(|e| StorageError::Io(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| StorageError::BackendUnavailable(e.to_string()))?;
        Ok(presigned.uri().to_string())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
