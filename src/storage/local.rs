// dbbackup-job/src/storage/local.rs
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use super::{UploadBackup, object_key};
use crate::config::Settings;
use crate::errors::{AppError, ErrorKind, Result, with_deadline};

/// Copies artifacts into a directory on a local or mounted filesystem.
///
/// The configured container is the base directory; the artifact ends up at
/// `<base>/<key_prefix><artifact name>`.
pub struct LocalUploader {
    base_path: PathBuf,
    key_prefix: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl LocalUploader {
    pub fn new(base_path: &str, key_prefix: &str, settings: &Settings) -> Self {
        info!(base_path = %base_path, "Initializing local storage");
        Self {
            base_path: PathBuf::from(base_path),
            key_prefix: key_prefix.to_string(),
            work_dir: settings.work_dir.clone(),
            timeout: settings.timeouts.upload,
        }
    }

    /// Where `artifact_name` will be stored.
    pub fn destination_path(&self, artifact_name: &str) -> Result<PathBuf> {
        let key = object_key(&self.key_prefix, artifact_name);
        let relative = Path::new(&key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(AppError::Upload(format!(
                "key '{}' must stay inside {}",
                key,
                self.base_path.display()
            )));
        }
        Ok(self.base_path.join(relative))
    }

    async fn copy_artifact(&self, source: &Path, destination: &Path) -> Result<u64> {
        if let Some(parent) = destination.parent() {
            debug!(dir = %parent.display(), "Ensuring destination directory");
            fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Upload(format!(
                    "failed to create destination directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        fs::copy(source, destination).await.map_err(|e| {
            AppError::Upload(format!(
                "failed to copy {} to {}: {}",
                source.display(),
                destination.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl UploadBackup for LocalUploader {
    async fn upload_backup(&self, artifact_name: &str) -> Result<()> {
        let source = self.work_dir.join(artifact_name);
        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Err(AppError::Upload(format!(
                "failed to open file {}: not found",
                source.display()
            )));
        }
        let destination = self.destination_path(artifact_name)?;
        // Copying a file onto itself truncates it.
        if same_file(&source, &destination).await {
            info!(
                artifact = %artifact_name,
                destination = %destination.display(),
                "Artifact already at destination, skipping copy"
            );
            return Ok(());
        }

        let bytes = with_deadline(
            ErrorKind::Upload,
            format!("copy to {}", destination.display()),
            self.timeout,
            self.copy_artifact(&source, &destination),
        )
        .await?;

        info!(
            artifact = %artifact_name,
            destination = %destination.display(),
            bytes,
            "Backup stored"
        );
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }

    fn stored_path(&self, artifact_name: &str) -> Option<PathBuf> {
        self.destination_path(artifact_name).ok()
    }
}

/// True when both paths resolve to the same existing file.
pub async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
