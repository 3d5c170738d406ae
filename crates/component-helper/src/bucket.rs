//! Bucket cleanup before destroying a dependency
//!
//! Versioned buckets cannot be deleted while any object version or delete
//! marker remains, so every version is removed first.

use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::config::Operation;
use crate::context::CallContext;
use crate::error::{HarnessError, HarnessResult};

/// Maximum keys accepted by a single `DeleteObjects` request
const DELETE_BATCH: usize = 1000;

#[async_trait]
pub trait BucketCleaner: Send + Sync {
    /// Remove every object version and delete marker from `bucket`.
    /// Returns the number of entries deleted.
    async fn empty_bucket(&self, ctx: &CallContext, bucket: &str) -> HarnessResult<usize>;
}

/// [`BucketCleaner`] using the S3 API
#[derive(Debug, Clone)]
pub struct S3BucketCleaner {
    client: Client,
}

impl S3BucketCleaner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient credential chain for `region`
    pub async fn from_env(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config))
    }

    async fn delete_batch(&self, ctx: &CallContext, bucket: &str, batch: Vec<ObjectIdentifier>) -> HarnessResult<()> {
        let delete = Delete::builder()
            .set_objects(Some(batch))
            .quiet(true)
            .build()
            .map_err(|e| cleanup_error(bucket, e))?;

        let label = format!("s3:DeleteObjects {bucket}");
        let output = ctx
            .bounded(Operation::Api, &label, async {
                self.client
                    .delete_objects()
                    .bucket(bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| cleanup_error(bucket, DisplayErrorContext(e)))
            })
            .await?;

        if let Some(failure) = output.errors().first() {
            return Err(HarnessError::BucketCleanup {
                bucket: bucket.to_string(),
                reason: format!(
                    "could not delete {}: {}",
                    failure.key().unwrap_or("<unknown key>"),
                    failure.message().unwrap_or("no message")
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BucketCleaner for S3BucketCleaner {
    async fn empty_bucket(&self, ctx: &CallContext, bucket: &str) -> HarnessResult<usize> {
        info!("Emptying bucket {}", bucket);

        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;
        let mut deleted = 0;
        let label = format!("s3:ListObjectVersions {bucket}");

        loop {
            let page = ctx
                .bounded(Operation::Api, &label, async {
                    self.client
                        .list_object_versions()
                        .bucket(bucket)
                        .set_key_marker(key_marker.clone())
                        .set_version_id_marker(version_marker.clone())
                        .send()
                        .await
                        .map_err(|e| cleanup_error(bucket, DisplayErrorContext(e)))
                })
                .await?;

            let versions = page
                .versions()
                .iter()
                .filter_map(|v| v.key().map(|k| (k, v.version_id())));
            let markers = page
                .delete_markers()
                .iter()
                .filter_map(|m| m.key().map(|k| (k, m.version_id())));

            let ids = versions
                .chain(markers)
                .map(|(key, version)| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .set_version_id(version.map(str::to_string))
                        .build()
                        .map_err(|e| cleanup_error(bucket, e))
                })
                .collect::<HarnessResult<Vec<_>>>()?;

            for batch in ids.chunks(DELETE_BATCH) {
                self.delete_batch(ctx, bucket, batch.to_vec()).await?;
                deleted += batch.len();
                debug!("Deleted {} entries from {}", deleted, bucket);
            }

            if page.is_truncated() == Some(true) {
                key_marker = page.next_key_marker().map(str::to_string);
                version_marker = page.next_version_id_marker().map(str::to_string);
            } else {
                break;
            }
        }

        info!("Bucket {} emptied ({} entries)", bucket, deleted);
        Ok(deleted)
    }
}

fn cleanup_error(bucket: &str, reason: impl std::fmt::Display) -> HarnessError {
    HarnessError::BucketCleanup {
        bucket: bucket.to_string(),
        reason: reason.to_string(),
    }
}
