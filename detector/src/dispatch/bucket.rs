use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_types::region::Region;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use motion_watch_common::capture::{capture_object_key, content_type};
use motion_watch_common::config::BucketConfig;
use tracing::{debug, info};

use super::EncodedCapture;

/// One capture object as listed from the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Capture storage in an S3-compatible bucket.
#[derive(Clone)]
pub struct BucketStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl BucketStore {
    /// Static credentials when both keys are configured, the default AWS
    /// provider chain otherwise.
    pub async fn new(config: &BucketConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let creds = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(creds);
        }
        let sdk_config = loader.load().await;

        // Custom endpoints (MinIO, GCS interop) want path-style addressing.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Check that the bucket exists and is reachable with our credentials.
    pub async fn check(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::HeadBucket(e.to_string()))?;
        info!(bucket = self.bucket, "bucket reachable");
        Ok(())
    }

    /// Upload an encoded capture. Returns the object key.
    pub async fn put_capture(&self, capture: &EncodedCapture) -> Result<String, StorageError> {
        let key = capture_object_key(&self.prefix, &capture.timestamp, &capture.ext);
        self.put(&key, capture.bytes.clone(), content_type(&capture.ext))
            .await?;
        Ok(key)
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::PutObject(e.to_string()))?;
        debug!(key, size, "stored capture in bucket");
        Ok(())
    }

    /// Every object under the capture prefix, in key order.
    pub async fn list_captures(&self) -> Result<Vec<StoredObject>, StorageError> {
        let mut result = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix);
            if let Some(token) = &continuation_token {
                req = req.continuation_token(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| StorageError::ListObjects(e.to_string()))?;

            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    result.push(StoredObject {
                        key: key.to_string(),
                        size_bytes: obj.size().unwrap_or(0).max(0) as u64,
                        last_modified: obj.last_modified().and_then(to_chrono),
                    });
                }
            }

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(result)
    }

    /// The `limit` most recent captures, newest first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<StoredObject>, StorageError> {
        let mut objects = self.list_captures().await?;
        // Keys embed the date and time, so key order is capture order.
        objects.sort_by(|a, b| b.key.cmp(&a.key));
        objects.truncate(limit);
        Ok(objects)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::DeleteObject(e.to_string()))?;
        debug!(key, "deleted from bucket");
        Ok(())
    }

    /// Delete capture objects last modified before `cutoff`. Returns how
    /// many were removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let objects = self.list_captures().await?;
        let mut deleted = 0;
        for key in expired_keys(&objects, cutoff) {
            self.delete(key).await?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

fn to_chrono(t: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(t.secs(), t.subsec_nanos())
}

/// Objects with a known modification time before `cutoff`.
fn expired_keys(objects: &[StoredObject], cutoff: DateTime<Utc>) -> Vec<&str> {
    objects
        .iter()
        .filter(|o| o.last_modified.is_some_and(|t| t < cutoff))
        .map(|o| o.key.as_str())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("bucket not reachable: {0}")]
    HeadBucket(String),
    #[error("failed to put object: {0}")]
    PutObject(String),
    #[error("failed to list objects: {0}")]
    ListObjects(String),
    #[error("failed to delete object: {0}")]
    DeleteObject(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn object(key: &str, modified: Option<DateTime<Utc>>) -> StoredObject {
        StoredObject {
            key: key.into(),
            size_bytes: 10,
            last_modified: modified,
        }
    }

    #[test]
    fn smithy_time_converts() {
        let t = aws_smithy_types::DateTime::from_secs(1_700_000_000);
        assert_eq!(
            to_chrono(&t),
            Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
        );
    }

    #[test]
    fn only_objects_before_cutoff_expire() {
        let cutoff = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let objects = vec![
            object("captures/2024/01/01/motion_10-00-00.jpg", Some(cutoff - chrono::Duration::days(31))),
            object("captures/2024/02/02/motion_10-00-00.jpg", Some(cutoff + chrono::Duration::days(1))),
            object("captures/unknown.jpg", None),
        ];
        assert_eq!(
            expired_keys(&objects, cutoff),
            vec!["captures/2024/01/01/motion_10-00-00.jpg"]
        );
    }
}
