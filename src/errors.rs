use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Extraction,
    Compression,
    Upload,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Connection => "connection",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Compression => "compression",
            ErrorKind::Upload => "upload",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration error: unknown source kind '{0}'. Supported: mysql, mongodb")]
    UnknownSource(String),

    #[error("Configuration error: unknown destination kind '{0}'. Supported: aws, gcs, local")]
    UnknownDestination(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("{stage} timed out after {}s: {what}", .after.as_secs_f64())]
    Timeout {
        stage: ErrorKind,
        what: String,
        after: Duration,
    },
}

impl AppError {
    pub fn timeout(stage: ErrorKind, what: impl Into<String>, after: Duration) -> Self {
        AppError::Timeout {
            stage,
            what: what.into(),
            after,
        }
    }

    /// Stage this error is reported under. Timeouts belong to the stage that hit them.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Config(_) | AppError::UnknownSource(_) | AppError::UnknownDestination(_) => {
                ErrorKind::Configuration
            }
            AppError::Connection(_) => ErrorKind::Connection,
            AppError::Extraction(_) => ErrorKind::Extraction,
            AppError::Compression(_) => ErrorKind::Compression,
            AppError::Upload(_) => ErrorKind::Upload,
            AppError::Timeout { stage, .. } => *stage,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Runs `fut` under `limit`, mapping an elapsed deadline to a stage timeout.
pub async fn with_deadline<T, F>(
    stage: ErrorKind,
    what: impl Into<String>,
    limit: Duration,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(stage, what, limit)),
    }
}
