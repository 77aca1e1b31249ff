// dbbackup-job/src/storage/gcs.rs
use async_trait::async_trait;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore, PutPayload, RetryConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{UploadBackup, object_key};
use crate::config::Settings;
use crate::errors::{AppError, ErrorKind, Result, with_deadline};

/// Uploads artifacts to a Google Cloud Storage bucket with a single put.
pub struct GcsUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key_prefix: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl GcsUploader {
    /// Service account credentials are read from the `GOOGLE_*` environment.
    pub fn connect(bucket: &str, key_prefix: &str, settings: &Settings) -> Result<Self> {
        let client_options = ClientOptions::new()
            .with_timeout(settings.timeouts.upload)
            .with_connect_timeout(settings.timeouts.connect);
        let retry = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };

        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .with_client_options(client_options)
            .with_retry(retry)
            .build()
            .map_err(|e| AppError::Connection(format!("GCS bucket {}: {}", bucket, e)))?;

        Ok(Self::with_store(Arc::new(store), bucket, key_prefix, settings))
    }

    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        key_prefix: &str,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            key_prefix: key_prefix.to_string(),
            work_dir: settings.work_dir.clone(),
            timeout: settings.timeouts.upload,
        }
    }
}

#[async_trait]
impl UploadBackup for GcsUploader {
    async fn upload_backup(&self, artifact_name: &str) -> Result<()> {
        let file_path = self.work_dir.join(artifact_name);
        let data = tokio::fs::read(&file_path).await.map_err(|e| {
            AppError::Upload(format!(
                "failed to open file {}: {}",
                file_path.display(),
                e
            ))
        })?;
        let size = data.len();

        let key = object_key(&self.key_prefix, artifact_name);
        let location = ObjectPath::from(key.as_str());
        let destination = format!("gs://{}/{}", self.bucket, key);

        with_deadline(
            ErrorKind::Upload,
            format!("put {}", destination),
            self.timeout,
            async {
                self.store
                    .put(&location, PutPayload::from(data))
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        AppError::Upload(format!("failed to upload to {}: {}", destination, e))
                    })
            },
        )
        .await?;

        info!(artifact = %artifact_name, destination = %destination, bytes = size, "Backup uploaded");
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "gcs"
    }
}
