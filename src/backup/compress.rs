// dbbackup-job/src/backup/compress.rs
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::{AppError, Result};

/// Gzips an intermediate dump into `<work_dir>/<artifact name>`.
#[derive(Debug, Clone)]
pub struct Compressor {
    work_dir: PathBuf,
    artifact_name: String,
}

impl Compressor {
    pub fn new(work_dir: &Path, artifact_name: &str) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            artifact_name: artifact_name.to_string(),
        }
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.work_dir.join(&self.artifact_name)
    }

    /// Compresses `dump_path` and returns the artifact name.
    ///
    /// The whole dump is read into memory before the artifact is created, so an
    /// unreadable dump leaves any existing artifact alone.
    pub fn compress_backup(&self, dump_path: &Path) -> Result<String> {
        let data = fs::read(dump_path).map_err(|e| {
            AppError::Compression(format!(
                "failed to open backup file {}: {}",
                dump_path.display(),
                e
            ))
        })?;

        let artifact_path = self.artifact_path();
        if let Some(parent) = artifact_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::Compression(format!(
                        "failed to create directory for compressed file {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let out_file = File::create(&artifact_path).map_err(|e| {
            AppError::Compression(format!(
                "failed to create compressed file {}: {}",
                artifact_path.display(),
                e
            ))
        })?;

        let mut encoder = GzEncoder::new(out_file, Compression::default());
        encoder.write_all(&data).map_err(|e| {
            AppError::Compression(format!(
                "failed to compress backup into {}: {}",
                artifact_path.display(),
                e
            ))
        })?;

        let out_file = encoder.finish().map_err(|e| {
            AppError::Compression(format!(
                "failed to finish gzip stream for {}: {}",
                artifact_path.display(),
                e
            ))
        })?;
        out_file.sync_all().map_err(|e| {
            AppError::Compression(format!(
                "failed to flush compressed file {}: {}",
                artifact_path.display(),
                e
            ))
        })?;

        info!(
            artifact = %self.artifact_name,
            input_bytes = data.len(),
            "Compression completed"
        );
        Ok(self.artifact_name.clone())
    }
}
