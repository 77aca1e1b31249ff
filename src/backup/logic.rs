// dbbackup-job/src/backup/logic.rs
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::mongo::MongoExtractor;
use super::mysql::MySqlExtractor;
use super::{BackupSource, Compressor, Extractor};
use crate::config::{BackupJobConfig, SourceKind};
use crate::errors::Result;
use crate::storage::UploadBackup;
use crate::storage::local::same_file;
use crate::utils::make_backup_name;

/// Local files a finished backup left in the work directory.
struct LocalFiles {
    dump: PathBuf,
    artifact: PathBuf,
}

/// extract -> compress -> upload, once. Returns the artifact name.
pub async fn perform_backup_orchestration(config: &BackupJobConfig) -> Result<String> {
    let settings = &config.settings;
    let artifact_name = make_backup_name();
    info!(
        source = %config.source_kind,
        destination = %config.destination.kind,
        artifact = %artifact_name,
        "Starting backup job"
    );

    let compressor = Compressor::new(&settings.work_dir, &artifact_name);
    let (artifact, files) = match config.source_kind {
        SourceKind::MySql => {
            let extractor = MySqlExtractor::connect(&config.connection, settings).await?;
            backup_source(extractor, compressor).await?
        }
        SourceKind::MongoDb => {
            let extractor = MongoExtractor::connect(&config.connection, settings).await?;
            backup_source(extractor, compressor).await?
        }
    };

    let storage = config
        .destination
        .kind
        .connect(
            &config.destination.container,
            &config.destination.key_prefix,
            settings,
        )
        .await?;
    info!(backend = storage.backend_type(), container = %config.destination.container, "Uploading backup");
    storage.upload_backup(&artifact).await?;

    if settings.cleanup_local {
        remove_local_files(&files, storage.stored_path(&artifact).as_deref()).await;
    }

    info!(artifact = %artifact, "Backup job finished");
    Ok(artifact)
}

async fn backup_source<E: Extractor>(
    extractor: E,
    compressor: Compressor,
) -> Result<(String, LocalFiles)> {
    let mut source = BackupSource::new(extractor, compressor);
    let artifact = source.backup_with_compression().await?;
    let files = LocalFiles {
        dump: source.dump_path().to_path_buf(),
        artifact: source.artifact_path(),
    };
    Ok((artifact, files))
}

/// Best effort: the backup already reached its destination. `stored` is never
/// removed, even when it is one of the local files.
async fn remove_local_files(files: &LocalFiles, stored: Option<&Path>) {
    for path in [&files.dump, &files.artifact] {
        if let Some(stored) = stored {
            if same_file(path, stored).await {
                info!(path = %path.display(), "Keeping local file, it is the stored backup");
                continue;
            }
        }
        remove_file(path).await;
    }
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "Removed local file"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove local file"),
    }
}
