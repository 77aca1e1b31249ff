// dbbackup-job/src/backup/mysql.rs
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Connection, Row, TypeInfo, ValueRef};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::Extractor;
use crate::config::{ConnectionConfig, Settings, Timeouts};
use crate::errors::{AppError, ErrorKind, Result, with_deadline};

pub const DUMP_FILE_NAME: &str = "dump.csv";
pub const NULL_PLACEHOLDER: &str = "NULL";

/// Dumps every table of a MySQL database into one CSV file.
///
/// Tables are written back to back in `SHOW TABLES` order, each as a header
/// record of column names followed by one record per row.
pub struct MySqlExtractor {
    conn: Option<MySqlConnection>,
    database: String,
    dump_path: PathBuf,
    timeouts: Timeouts,
}

impl MySqlExtractor {
    pub async fn connect(config: &ConnectionConfig, settings: &Settings) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database);

        let target = format!("{}:{}/{}", config.host, config.port, config.database);
        let conn = with_deadline(
            ErrorKind::Connection,
            format!("connect to mysql {}", target),
            settings.timeouts.connect,
            async {
                MySqlConnection::connect_with(&options).await.map_err(|e| {
                    AppError::Connection(format!("failed to connect to mysql {}: {}", target, e))
                })
            },
        )
        .await?;
        info!(database = %config.database, host = %config.host, "Connected to MySQL");

        Ok(Self {
            conn: Some(conn),
            database: config.database.clone(),
            dump_path: settings.work_dir.join(DUMP_FILE_NAME),
            timeouts: settings.timeouts,
        })
    }
}

#[async_trait]
impl Extractor for MySqlExtractor {
    async fn make_backup(&mut self) -> Result<PathBuf> {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| AppError::Extraction("mysql connection already used".to_string()))?;

        let result = dump_all(&mut conn, &self.database, &self.dump_path, self.timeouts).await;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close MySQL connection cleanly");
        }
        result.map(|_| self.dump_path.clone())
    }

    fn dump_path(&self) -> &Path {
        &self.dump_path
    }

    fn source_name(&self) -> &'static str {
        "mysql"
    }
}

async fn dump_all(
    conn: &mut MySqlConnection,
    database: &str,
    dump_path: &Path,
    timeouts: Timeouts,
) -> Result<()> {
    let tables = with_deadline(
        ErrorKind::Extraction,
        "list tables",
        timeouts.list_tables,
        list_tables(conn),
    )
    .await?;
    info!(database = %database, tables = tables.len(), "Found tables");

    let mut dump = CsvDump::create(dump_path)?;
    for table in &tables {
        let rows = with_deadline(
            ErrorKind::Extraction,
            format!("dump table {}", table),
            timeouts.per_table,
            dump_table(conn, table, &mut dump),
        )
        .await
        .map_err(|e| match e {
            AppError::Extraction(msg) => {
                AppError::Extraction(format!("failed to dump table {}: {}", table, msg))
            }
            other => other,
        })?;
        debug!(table = %table, rows, "Dumped table");
    }
    dump.finish()?;

    info!(path = %dump_path.display(), tables = tables.len(), "Backup completed");
    Ok(())
}

async fn list_tables(conn: &mut MySqlConnection) -> Result<Vec<String>> {
    let rows = sqlx::query("SHOW TABLES")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::Extraction(format!("failed to get tables: {}", e)))?;

    rows.iter().map(|row| text_column(row, 0)).collect()
}

async fn table_columns(conn: &mut MySqlConnection, table: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT COLUMN_NAME FROM information_schema.COLUMNS
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
         ORDER BY ORDINAL_POSITION",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::Extraction(format!("failed to fetch columns: {}", e)))?;

    rows.iter().map(|row| text_column(row, 0)).collect()
}

/// Streams one table into `dump` and returns the number of data rows written.
async fn dump_table<W: Write + Send>(
    conn: &mut MySqlConnection,
    table: &str,
    dump: &mut CsvDump<W>,
) -> Result<u64> {
    // Column names come from the catalog so empty tables still get a header.
    let columns = table_columns(conn, table).await?;
    dump.write_header(&columns)?;

    let sql = format!("SELECT * FROM {}", quote_identifier(table));
    let mut rows = sqlx::query(&sql).fetch(&mut *conn);
    let mut count = 0u64;
    while let Some(row) = rows
        .try_next()
        .await
        .map_err(|e| AppError::Extraction(format!("query failed: {}", e)))?
    {
        let values = (0..row.len())
            .map(|i| render_value(&row, i))
            .collect::<Result<Vec<_>>>()?;
        dump.write_row(&values)?;
        count += 1;
    }
    Ok(count)
}

/// Backtick-quotes a MySQL identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Catalog strings arrive as VARCHAR or VARBINARY depending on server version.
fn text_column(row: &MySqlRow, index: usize) -> Result<String> {
    if let Ok(value) = row.try_get::<String, _>(index) {
        return Ok(value);
    }
    row.try_get::<Vec<u8>, _>(index)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|e| AppError::Extraction(format!("failed to read catalog value: {}", e)))
}

/// Renders one column as plain text; `None` for SQL NULL.
fn render_value(row: &MySqlRow, index: usize) -> Result<Option<String>> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| AppError::Extraction(format!("failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(None);
    }
    let type_name = raw.type_info().name().to_string();

    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(Some(v));
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<u64, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<f32, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<sqlx::types::BigDecimal, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
        return Ok(Some(v.naive_utc().to_string()));
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<chrono::NaiveTime, _>(index) {
        return Ok(Some(v.to_string()));
    }
    if let Ok(v) = row.try_get::<serde_json::Value, _>(index) {
        return Ok(Some(v.to_string()));
    }
    // BLOB, BIT, GEOMETRY and friends.
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(Some(String::from_utf8_lossy(&v).into_owned()));
    }

    Err(AppError::Extraction(format!(
        "unsupported data type {} in column {}",
        type_name, index
    )))
}

/// CSV writer for the relational dump. Records may differ in width between
/// tables.
pub struct CsvDump<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvDump<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            AppError::Extraction(format!(
                "failed to create backup file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::from_writer(file))
    }
}

impl<W: Write> CsvDump<W> {
    pub fn from_writer(inner: W) -> Self {
        let writer = csv::WriterBuilder::new().flexible(true).from_writer(inner);
        Self { writer }
    }

    pub fn write_header(&mut self, columns: &[String]) -> Result<()> {
        self.writer
            .write_record(columns)
            .map_err(|e| AppError::Extraction(format!("failed to write header: {}", e)))
    }

    pub fn write_row(&mut self, values: &[Option<String>]) -> Result<()> {
        self.writer
            .write_record(
                values
                    .iter()
                    .map(|v| v.as_deref().unwrap_or(NULL_PLACEHOLDER)),
            )
            .map_err(|e| AppError::Extraction(format!("failed to write row: {}", e)))
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer
            .flush()
            .map_err(|e| AppError::Extraction(format!("failed to flush backup file: {}", e)))?;
        self.writer
            .into_inner()
            .map_err(|e| AppError::Extraction(format!("failed to flush backup file: {}", e.error())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;
    use tempfile::TempDir;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_users_then_empty_orders_layout() -> anyhow::Result<()> {
        let mut dump = CsvDump::from_writer(Vec::new());

        dump.write_header(&columns(&["id", "name", "email"]))?;
        dump.write_row(&row(&[Some("1"), Some("ada"), Some("ada@example.com")]))?;
        dump.write_row(&row(&[Some("2"), Some("grace"), None]))?;
        dump.write_row(&row(&[Some("3"), Some("linus"), Some("linus@example.com")]))?;
        dump.write_header(&columns(&["id", "user_id", "total", "created_at"]))?;

        let out = String::from_utf8(dump.finish()?)?;
        assert_eq!(
            out,
            "id,name,email\n\
             1,ada,ada@example.com\n\
             2,grace,NULL\n\
             3,linus,linus@example.com\n\
             id,user_id,total,created_at\n"
        );
        Ok(())
    }

    #[test]
    fn test_values_needing_quotes_are_escaped() -> anyhow::Result<()> {
        let mut dump = CsvDump::from_writer(Vec::new());
        dump.write_header(&columns(&["note"]))?;
        dump.write_row(&row(&[Some("hello, \"world\"")]))?;
        dump.write_row(&row(&[Some("two\nlines")]))?;

        let out = String::from_utf8(dump.finish()?)?;
        assert_eq!(out, "note\n\"hello, \"\"world\"\"\"\n\"two\nlines\"\n");
        Ok(())
    }

    #[test]
    fn test_create_writes_to_disk() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(DUMP_FILE_NAME);
        let mut dump = CsvDump::create(&path)?;
        dump.write_header(&columns(&["id"]))?;
        dump.finish()?;
        assert_eq!(std::fs::read_to_string(&path)?, "id\n");
        Ok(())
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let err = CsvDump::create(Path::new("/nonexistent-dir/dump.csv")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert!(err.to_string().contains("failed to create backup file"));
    }

    #[test]
    fn test_quote_identifier_escapes_backticks() {
        assert_eq!(quote_identifier("users"), "`users`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    /// Needs a server: `BACKUP_TEST_MYSQL_URL=mysql://root:pw@127.0.0.1:3306 cargo test -- --ignored`.
    /// The test recreates its own `dbbackup_job_it` database.
    #[tokio::test]
    #[ignore]
    async fn test_dump_all_against_live_server() -> anyhow::Result<()> {
        use sqlx::Executor;
        use std::str::FromStr;

        let Ok(url) = std::env::var("BACKUP_TEST_MYSQL_URL") else {
            return Ok(());
        };
        let database = "dbbackup_job_it";
        let mut admin = MySqlConnection::connect(&url).await?;
        admin
            .execute(format!("DROP DATABASE IF EXISTS {0}; CREATE DATABASE {0}", database).as_str())
            .await?;
        admin.close().await?;

        let options = MySqlConnectOptions::from_str(&url)?.database(database);
        let mut conn = MySqlConnection::connect_with(&options).await?;
        conn.execute(
            "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(32), email VARCHAR(64));
             INSERT INTO users VALUES (1, 'ada', 'ada@example.com'), (2, 'grace', NULL),
                                      (3, 'linus', 'linus@example.com');
             CREATE TABLE orders (id INT PRIMARY KEY, user_id INT, total DECIMAL(10,2), created_at DATETIME);",
        )
        .await?;

        let dir = TempDir::new()?;
        let path = dir.path().join(DUMP_FILE_NAME);
        dump_all(&mut conn, database, &path, Timeouts::default()).await?;
        conn.close().await?;

        assert_eq!(
            std::fs::read_to_string(&path)?,
            "id,user_id,total,created_at\n\
             id,name,email\n\
             1,ada,ada@example.com\n\
             2,grace,NULL\n\
             3,linus,linus@example.com\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_connection_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        // Grab a free port and release it so nothing is listening there.
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();

        let config = ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: "backup".to_string(),
            password: "secret".to_string(),
            database: "shop".to_string(),
            collection: None,
        };
        let mut settings = Settings::default();
        settings.work_dir = dir.path().to_path_buf();
        settings.timeouts.connect = Duration::from_secs(2);

        let err = MySqlExtractor::connect(&config, &settings).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(!dir.path().join(DUMP_FILE_NAME).exists());
        Ok(())
    }
}
