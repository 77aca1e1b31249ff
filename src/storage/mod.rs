// Storage layer
//
// Uploaders place a finished artifact at its destination. The set of
// destinations is closed: `DestinationKind` names them and `StorageLayer`
// dispatches to the concrete uploader.

pub mod gcs;
pub mod local;
pub mod s3;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::Settings;
use crate::errors::{AppError, Result};
pub use gcs::GcsUploader;
pub use local::LocalUploader;
pub use s3::S3Uploader;

/// Places a compressed artifact from the work directory at its destination.
#[async_trait]
pub trait UploadBackup: Send + Sync {
    /// Uploads `<work_dir>/<artifact_name>` under `key_prefix + artifact_name`.
    async fn upload_backup(&self, artifact_name: &str) -> Result<()>;

    /// Backend identifier for logs.
    fn backend_type(&self) -> &'static str;

    /// Local filesystem path of the stored copy, for backends that have one.
    fn stored_path(&self, _artifact_name: &str) -> Option<PathBuf> {
        None
    }
}

/// Object key (or relative path) an artifact is stored under.
pub fn object_key(key_prefix: &str, artifact_name: &str) -> String {
    format!("{}{}", key_prefix, artifact_name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    S3,
    Gcs,
    Local,
}

/// Resolves a destination kind string. Unknown kinds fail here, before any
/// client is built.
pub fn get_storage_layer(kind: &str) -> Result<DestinationKind> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "aws" | "s3" => Ok(DestinationKind::S3),
        "gcs" | "gcp" => Ok(DestinationKind::Gcs),
        "local" => Ok(DestinationKind::Local),
        _ => Err(AppError::UnknownDestination(kind.to_string())),
    }
}

impl FromStr for DestinationKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        get_storage_layer(s)
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::S3 => f.write_str("aws"),
            DestinationKind::Gcs => f.write_str("gcs"),
            DestinationKind::Local => f.write_str("local"),
        }
    }
}

impl DestinationKind {
    /// Builds the uploader for this kind.
    pub async fn connect(
        self,
        container: &str,
        key_prefix: &str,
        settings: &Settings,
    ) -> Result<StorageLayer> {
        let layer = match self {
            DestinationKind::S3 => {
                StorageLayer::S3(S3Uploader::connect(container, key_prefix, settings).await)
            }
            DestinationKind::Gcs => {
                StorageLayer::Gcs(GcsUploader::connect(container, key_prefix, settings)?)
            }
            DestinationKind::Local => {
                StorageLayer::Local(LocalUploader::new(container, key_prefix, settings))
            }
        };
        Ok(layer)
    }
}

pub enum StorageLayer {
    S3(S3Uploader),
    Gcs(GcsUploader),
    Local(LocalUploader),
}

#[async_trait]
impl UploadBackup for StorageLayer {
    async fn upload_backup(&self, artifact_name: &str) -> Result<()> {
        match self {
            StorageLayer::S3(uploader) => uploader.upload_backup(artifact_name).await,
            StorageLayer::Gcs(uploader) => uploader.upload_backup(artifact_name).await,
            StorageLayer::Local(uploader) => uploader.upload_backup(artifact_name).await,
        }
    }

    fn backend_type(&self) -> &'static str {
        match self {
            StorageLayer::S3(uploader) => uploader.backend_type(),
            StorageLayer::Gcs(uploader) => uploader.backend_type(),
            StorageLayer::Local(uploader) => uploader.backend_type(),
        }
    }

    fn stored_path(&self, artifact_name: &str) -> Option<PathBuf> {
        match self {
            StorageLayer::Local(uploader) => uploader.stored_path(artifact_name),
            StorageLayer::S3(_) | StorageLayer::Gcs(_) => None,
        }
    }
}
