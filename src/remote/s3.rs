use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use std::time::Duration;
use uuid::Uuid;

use super::{MediaType, UploadSlot};
use crate::config::S3SlotConfig;
use crate::{PipelineError, Result};

/// Issues upload slots by presigning S3 `PutObject` requests locally
pub struct S3Presigner {
    client: S3Client,
    bucket: String,
    key_prefix: String,
    expires_in: Duration,
}

impl S3Presigner {
    pub async fn from_config(config: &S3SlotConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        Self {
            client: S3Client::new(&aws_config),
            bucket: config.bucket.clone(),
            key_prefix: config.key_prefix.clone().unwrap_or_default(),
            expires_in: Duration::from_secs(config.presign_expiry_secs),
        }
    }

    /// Unique object key for a new upload
    pub fn object_key(prefix: &str, media_type: MediaType) -> String {
        format!(
            "{}upload_{}_{}.{}",
            prefix,
            Uuid::new_v4(),
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            media_type.extension()
        )
    }

    pub async fn presign_put(&self, media_type: MediaType) -> Result<UploadSlot> {
        let key = Self::object_key(&self.key_prefix, media_type);
        tracing::info!("Presigning upload slot: s3://{}/{}", self.bucket, key);

        let presigning = PresigningConfig::expires_in(self.expires_in)
            .map_err(|e| PipelineError::SlotRequestFailed(e.to_string()))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(media_type.as_str())
            .presigned(presigning)
            .await
            .map_err(|e| PipelineError::SlotRequestFailed(e.to_string()))?;

        Ok(UploadSlot {
            upload_url: request.uri().to_string(),
            media_type,
        })
    }
}
