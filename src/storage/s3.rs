// dbbackup-job/src/storage/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::retry::RetryConfig;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use super::{UploadBackup, object_key};
use crate::config::Settings;
use crate::errors::{AppError, ErrorKind, Result, with_deadline};

/// Uploads artifacts to an S3 (or S3-compatible) bucket with a single PutObject.
pub struct S3Uploader {
    client: s3::Client,
    bucket: String,
    key_prefix: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl S3Uploader {
    /// Credentials and region come from the standard AWS provider chain.
    pub async fn connect(bucket: &str, key_prefix: &str, settings: &Settings) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest());
        if let Some(endpoint) = &settings.s3_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // One attempt only; a failed job is rerun as a whole.
        let mut s3_config =
            s3::config::Builder::from(&sdk_config).retry_config(RetryConfig::disabled());
        if settings.s3_endpoint.is_some() {
            // MinIO and friends rarely support virtual-hosted buckets.
            s3_config = s3_config.force_path_style(true);
        }

        Self::with_client(
            s3::Client::from_conf(s3_config.build()),
            bucket,
            key_prefix,
            settings,
        )
    }

    pub fn with_client(client: s3::Client, bucket: &str, key_prefix: &str, settings: &Settings) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key_prefix: key_prefix.to_string(),
            work_dir: settings.work_dir.clone(),
            timeout: settings.timeouts.upload,
        }
    }
}

#[async_trait]
impl UploadBackup for S3Uploader {
    async fn upload_backup(&self, artifact_name: &str) -> Result<()> {
        let file_path = self.work_dir.join(artifact_name);
        let key = object_key(&self.key_prefix, artifact_name);

        let body = ByteStream::from_path(&file_path).await.map_err(|e| {
            AppError::Upload(format!(
                "failed to open file {}: {}",
                file_path.display(),
                e
            ))
        })?;

        let destination = format!("s3://{}/{}", self.bucket, key);
        with_deadline(
            ErrorKind::Upload,
            format!("put {}", destination),
            self.timeout,
            async {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| {
                        AppError::Upload(format!(
                            "failed to upload {} to {}: {}",
                            file_path.display(),
                            destination,
                            DisplayErrorContext(e)
                        ))
                    })
            },
        )
        .await?;

        info!(artifact = %artifact_name, destination = %destination, "Backup uploaded");
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
