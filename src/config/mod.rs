// dbbackup-job/src/config/mod.rs
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{AppError, Result};
use crate::storage::{DestinationKind, get_storage_layer};

/// Prefix shared by every environment variable the job reads.
pub const ENV_PREFIX: &str = "BACKUP_";

const DEFAULT_WORK_DIR: &str = "/tmp";
const DEFAULT_DEST_TYPE: &str = "local";

/// Which database engine the backup reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    MySql,
    MongoDb,
}

impl FromStr for SourceKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(SourceKind::MySql),
            "mongodb" | "mongo" => Ok(SourceKind::MongoDb),
            _ => Err(AppError::UnknownSource(s.to_string())),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::MySql => f.write_str("mysql"),
            SourceKind::MongoDb => f.write_str("mongodb"),
        }
    }
}

#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Only meaningful for document sources.
    pub collection: Option<String>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DestinationConfig {
    pub kind: DestinationKind,
    /// Bucket, container, or base directory depending on `kind`.
    pub container: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(AppError::Config(format!(
                "BACKUP_LOG_FORMAT must be 'json' or 'pretty', got '{}'",
                other
            ))),
        }
    }
}

impl LogFormat {
    /// Unset or blank means JSON.
    fn resolve(raw: Option<&str>) -> Result<Self> {
        match raw.filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw.parse(),
            None => Ok(LogFormat::Json),
        }
    }
}

/// Reads `BACKUP_LOG_FORMAT` on its own, so logging can start before the rest
/// of the configuration is validated.
pub fn log_format_from_env() -> Result<LogFormat> {
    let name = format!("{}LOG_FORMAT", ENV_PREFIX);
    match std::env::var_os(&name) {
        None => LogFormat::resolve(None),
        Some(raw) => {
            let raw = raw
                .into_string()
                .map_err(|_| AppError::Config(format!("{} is not valid UTF-8", name)))?;
            LogFormat::resolve(Some(&raw))
        }
    }
}

/// Bounds applied to every suspending operation of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub list_tables: Duration,
    pub per_table: Duration,
    pub read_collection: Duration,
    pub upload: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: Duration::from_secs(10),
            list_tables: Duration::from_secs(50),
            per_table: Duration::from_secs(3),
            read_collection: Duration::from_secs(30),
            upload: Duration::from_secs(50),
        }
    }
}

/// Knobs with defaults; none of them is required to run a backup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub work_dir: PathBuf,
    pub timeouts: Timeouts,
    pub s3_endpoint: Option<String>,
    pub cleanup_local: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            timeouts: Timeouts::default(),
            s3_endpoint: None,
            cleanup_local: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupJobConfig {
    pub source_kind: SourceKind,
    pub connection: ConnectionConfig,
    pub destination: DestinationConfig,
    pub settings: Settings,
}

impl BackupJobConfig {
    /// Loads the job configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(prefixed_vars(std::env::vars_os())?)
    }

    /// Builds the configuration from `(name, value)` pairs. Names without the
    /// `BACKUP_` prefix are ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(ENV_PREFIX).map(|name| (name.to_string(), v)))
            .collect();
        let env = EnvView { vars: &vars };

        let source_kind: SourceKind = env.required("SOURCE_NAME")?.parse()?;

        let port_raw = env.required("PORT")?;
        let port = port_raw.trim().parse::<u16>().map_err(|_| {
            AppError::Config(format!("BACKUP_PORT must be a port number, got '{}'", port_raw))
        })?;

        let collection = env.optional("COLLECTION");
        if source_kind == SourceKind::MongoDb && collection.is_none() {
            return Err(AppError::Config(
                "BACKUP_COLLECTION must be set for mongodb sources".to_string(),
            ));
        }

        let connection = ConnectionConfig {
            host: env.required("HOST")?,
            port,
            username: env.required("USERNAME")?,
            password: env.required("PASSWORD")?,
            database: env.required("DB_NAME")?,
            collection,
        };

        let dest_type = env
            .optional("DEST_TYPE")
            .unwrap_or_else(|| DEFAULT_DEST_TYPE.to_string());
        let destination = DestinationConfig {
            kind: get_storage_layer(&dest_type)?,
            container: env.required("DEST_NAME")?,
            // An empty prefix is legitimate: objects land at the container root.
            key_prefix: env.present("DEST_PATH")?,
        };

        Ok(BackupJobConfig {
            source_kind,
            connection,
            destination,
            settings: load_settings(&env)?,
        })
    }
}

fn load_settings(env: &EnvView<'_>) -> Result<Settings> {
    let defaults = Settings::default();
    let timeouts = Timeouts {
        connect: env.seconds("CONNECT_TIMEOUT_SECS", defaults.timeouts.connect)?,
        list_tables: env.seconds("LIST_TIMEOUT_SECS", defaults.timeouts.list_tables)?,
        per_table: env.seconds("TABLE_TIMEOUT_SECS", defaults.timeouts.per_table)?,
        read_collection: env.seconds("READ_TIMEOUT_SECS", defaults.timeouts.read_collection)?,
        upload: env.seconds("UPLOAD_TIMEOUT_SECS", defaults.timeouts.upload)?,
    };

    let cleanup_local = match env.optional("CLEANUP_LOCAL") {
        Some(raw) => parse_flag("BACKUP_CLEANUP_LOCAL", &raw)?,
        None => defaults.cleanup_local,
    };

    // Consumed by logging setup; checked here so a typo fails the job.
    LogFormat::resolve(env.optional("LOG_FORMAT").as_deref())?;

    Ok(Settings {
        work_dir: env
            .optional("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir),
        timeouts,
        s3_endpoint: env.optional("S3_ENDPOINT"),
        cleanup_local,
    })
}

/// Keeps `BACKUP_` variables from a raw OS environment. Other variables are
/// skipped whatever their encoding; a non-UTF-8 `BACKUP_` value is an error.
fn prefixed_vars<I>(vars: I) -> Result<Vec<(String, String)>>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut out = Vec::new();
    for (name, value) in vars {
        let Some(name) = name.to_str().filter(|n| n.starts_with(ENV_PREFIX)) else {
            continue;
        };
        let value = value
            .into_string()
            .map_err(|_| AppError::Config(format!("{} is not valid UTF-8", name)))?;
        out.push((name.to_string(), value));
    }
    Ok(out)
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::Config(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

/// Lookup helpers over the prefix-stripped variables.
struct EnvView<'a> {
    vars: &'a HashMap<String, String>,
}

impl EnvView<'_> {
    /// Set and non-blank.
    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| AppError::Config(format!("{}{} must be set", ENV_PREFIX, name)))
    }

    /// Set, possibly empty.
    fn present(&self, name: &str) -> Result<String> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("{}{} must be set", ENV_PREFIX, name)))
    }

    fn optional(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }

    fn seconds(&self, name: &str, default: Duration) -> Result<Duration> {
        match self.optional(name) {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
                _ => Err(AppError::Config(format!(
                    "{}{} must be a positive number of seconds, got '{}'",
                    ENV_PREFIX, name, raw
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn base_vars() -> Vec<(String, String)> {
        [
            ("BACKUP_SOURCE_NAME", "mysql"),
            ("BACKUP_DB_NAME", "shop"),
            ("BACKUP_USERNAME", "backup"),
            ("BACKUP_PASSWORD", "s3cr3t"),
            ("BACKUP_HOST", "db.internal"),
            ("BACKUP_PORT", "3306"),
            ("BACKUP_DEST_NAME", "/srv/backups"),
            ("BACKUP_DEST_PATH", "nightly/"),
            ("PATH", "/usr/bin"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn with(mut vars: Vec<(String, String)>, key: &str, value: &str) -> Vec<(String, String)> {
        vars.retain(|(k, _)| k != key);
        vars.push((key.to_string(), value.to_string()));
        vars
    }

    fn without(mut vars: Vec<(String, String)>, key: &str) -> Vec<(String, String)> {
        vars.retain(|(k, _)| k != key);
        vars
    }

    #[test]
    fn test_loads_mysql_job_with_defaults() -> anyhow::Result<()> {
        let config = BackupJobConfig::from_vars(base_vars())?;

        assert_eq!(config.source_kind, SourceKind::MySql);
        assert_eq!(config.connection.host, "db.internal");
        assert_eq!(config.connection.port, 3306);
        assert_eq!(config.connection.database, "shop");
        assert_eq!(config.connection.collection, None);
        assert_eq!(config.destination.kind, DestinationKind::Local);
        assert_eq!(config.destination.container, "/srv/backups");
        assert_eq!(config.destination.key_prefix, "nightly/");
        assert_eq!(config.settings.work_dir, PathBuf::from("/tmp"));
        assert_eq!(config.settings.timeouts, Timeouts::default());
        assert!(!config.settings.cleanup_local);
        Ok(())
    }

    #[test]
    fn test_missing_required_variable_is_named() {
        let err = BackupJobConfig::from_vars(without(base_vars(), "BACKUP_HOST")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("BACKUP_HOST must be set"), "got: {err}");
    }

    #[test]
    fn test_blank_required_variable_is_rejected() {
        let err = BackupJobConfig::from_vars(with(base_vars(), "BACKUP_PASSWORD", "  ")).unwrap_err();
        assert!(err.to_string().contains("BACKUP_PASSWORD must be set"), "got: {err}");
    }

    #[test]
    fn test_empty_key_prefix_is_allowed() -> anyhow::Result<()> {
        let config = BackupJobConfig::from_vars(with(base_vars(), "BACKUP_DEST_PATH", ""))?;
        assert_eq!(config.destination.key_prefix, "");
        Ok(())
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let err = BackupJobConfig::from_vars(with(base_vars(), "BACKUP_PORT", "mysql")).unwrap_err();
        assert!(err.to_string().contains("BACKUP_PORT"), "got: {err}");
    }

    #[test]
    fn test_unknown_source_kind_fails() {
        let err = BackupJobConfig::from_vars(with(base_vars(), "BACKUP_SOURCE_NAME", "oracle")).unwrap_err();
        assert!(matches!(err, AppError::UnknownSource(ref k) if k == "oracle"));
    }

    #[test]
    fn test_unknown_destination_kind_fails() {
        let err = BackupJobConfig::from_vars(with(base_vars(), "BACKUP_DEST_TYPE", "ftp")).unwrap_err();
        assert!(matches!(err, AppError::UnknownDestination(ref k) if k == "ftp"));
    }

    #[test]
    fn test_mongodb_requires_collection() -> anyhow::Result<()> {
        let vars = with(base_vars(), "BACKUP_SOURCE_NAME", "mongodb");
        let err = BackupJobConfig::from_vars(vars.clone()).unwrap_err();
        assert!(err.to_string().contains("BACKUP_COLLECTION"), "got: {err}");

        let config = BackupJobConfig::from_vars(with(vars, "BACKUP_COLLECTION", "logs"))?;
        assert_eq!(config.source_kind, SourceKind::MongoDb);
        assert_eq!(config.connection.collection.as_deref(), Some("logs"));
        Ok(())
    }

    #[test]
    fn test_optional_settings_override_defaults() -> anyhow::Result<()> {
        let mut vars = with(base_vars(), "BACKUP_DEST_TYPE", "aws");
        vars = with(vars, "BACKUP_WORK_DIR", "/var/tmp/backup");
        vars = with(vars, "BACKUP_TABLE_TIMEOUT_SECS", "15");
        vars = with(vars, "BACKUP_CLEANUP_LOCAL", "true");
        vars = with(vars, "BACKUP_LOG_FORMAT", "pretty");
        vars = with(vars, "BACKUP_S3_ENDPOINT", "http://minio:9000");

        let config = BackupJobConfig::from_vars(vars)?;
        assert_eq!(config.destination.kind, DestinationKind::S3);
        assert_eq!(config.settings.work_dir, PathBuf::from("/var/tmp/backup"));
        assert_eq!(config.settings.timeouts.per_table, Duration::from_secs(15));
        assert_eq!(config.settings.timeouts.upload, Duration::from_secs(50));
        assert!(config.settings.cleanup_local);
        assert_eq!(config.settings.s3_endpoint.as_deref(), Some("http://minio:9000"));
        Ok(())
    }

    #[test]
    fn test_invalid_log_format_is_rejected() {
        let err = BackupJobConfig::from_vars(with(base_vars(), "BACKUP_LOG_FORMAT", "xml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("BACKUP_LOG_FORMAT"), "got: {err}");
    }

    #[test]
    fn test_log_format_resolution() {
        assert_eq!(LogFormat::resolve(None).unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::resolve(Some("  ")).unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::resolve(Some("Pretty")).unwrap(), LogFormat::Pretty);
        assert!(LogFormat::resolve(Some("xml")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_unrelated_variable_is_skipped() -> anyhow::Result<()> {
        use std::os::unix::ffi::OsStringExt;

        let mut raw: Vec<(OsString, OsString)> = base_vars()
            .into_iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect();
        raw.push((OsString::from("UNRELATED"), OsString::from_vec(vec![0xff, 0xfe])));
        raw.push((OsString::from_vec(vec![0xff, b'X']), OsString::from("x")));

        let vars = prefixed_vars(raw)?;
        assert!(vars.iter().all(|(k, _)| k.starts_with(ENV_PREFIX)));
        let config = BackupJobConfig::from_vars(vars)?;
        assert_eq!(config.connection.database, "shop");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_backup_value_is_a_configuration_error() {
        use std::os::unix::ffi::OsStringExt;

        let raw = vec![(
            OsString::from("BACKUP_PASSWORD"),
            OsString::from_vec(vec![b'p', 0xff]),
        )];
        let err = prefixed_vars(raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("BACKUP_PASSWORD"), "got: {err}");
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let err = BackupJobConfig::from_vars(with(base_vars(), "BACKUP_UPLOAD_TIMEOUT_SECS", "0")).unwrap_err();
        assert!(err.to_string().contains("BACKUP_UPLOAD_TIMEOUT_SECS"), "got: {err}");
    }

    #[test]
    fn test_debug_output_redacts_password() -> anyhow::Result<()> {
        let config = BackupJobConfig::from_vars(base_vars())?;
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("<redacted>"));
        Ok(())
    }
}
