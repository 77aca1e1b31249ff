mod logic;
pub(crate) mod compress; // gzip stage shared by every source
pub(crate) mod mongo;
pub(crate) mod mysql;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::BackupJobConfig;
use crate::errors::Result;
pub use compress::Compressor;

/// Produces the uncompressed intermediate dump for one database kind.
#[async_trait]
pub trait Extractor: Send {
    /// Dumps the source to `dump_path()` and returns that path.
    async fn make_backup(&mut self) -> Result<PathBuf>;

    /// Fixed location of the intermediate dump.
    fn dump_path(&self) -> &Path;

    /// Short engine name for logs.
    fn source_name(&self) -> &'static str;
}

/// Extractor and compressor run as one unit: dump, then gzip.
pub struct BackupSource<E> {
    extractor: E,
    compressor: Compressor,
}

impl<E: Extractor> BackupSource<E> {
    pub fn new(extractor: E, compressor: Compressor) -> Self {
        Self {
            extractor,
            compressor,
        }
    }

    /// Runs the extractor, then the compressor, and returns the artifact name.
    /// A failed extraction returns before the compressor touches the filesystem.
    pub async fn backup_with_compression(&mut self) -> Result<String> {
        info!(source = self.extractor.source_name(), "Starting extraction");
        let dump_path = self.extractor.make_backup().await?;
        self.compressor.compress_backup(&dump_path)
    }

    pub fn dump_path(&self) -> &Path {
        self.extractor.dump_path()
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.compressor.artifact_path()
    }
}

/// Public entry point for the backup job.
pub async fn run_backup_flow(config: &BackupJobConfig) -> Result<String> {
    logic::perform_backup_orchestration(config).await
}
