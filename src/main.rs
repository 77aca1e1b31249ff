//! Database backup job
//!
//! Dumps one MySQL database or MongoDB collection, gzips the dump and uploads
//! it to S3, GCS or a local directory, then exits.

// dbbackup-job/src/main.rs
mod backup;
mod config;
mod errors;
mod storage;
mod utils;

use anyhow::{Context, Result};
use config::{BackupJobConfig, LogFormat};
use errors::AppError;
use std::process::ExitCode;
use tracing::{error, info};

/// Main entry point for the backup job
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is normal in containers.
    dotenv::dotenv().ok();
    // An invalid value is reported again, as a configuration error, once
    // logging is up.
    let log_format = config::log_format_from_env().unwrap_or(LogFormat::Json);
    utils::logging::init_logging(log_format);

    match run_app().await {
        Ok(artifact) => {
            info!(artifact = %artifact, "Backup completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let app_error = e.downcast_ref::<AppError>();
            let kind = app_error
                .map(|err| err.kind().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let timeout = app_error.is_some_and(AppError::is_timeout);
            error!(kind = %kind, timeout, error = %format!("{:#}", e), "Backup job failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<String> {
    let config = BackupJobConfig::from_env().context("Failed to load backup configuration")?;
    info!(config = ?config, "Loaded configuration");

    backup::run_backup_flow(&config)
        .await
        .context("Backup process failed")
}
