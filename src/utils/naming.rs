// dbbackup-job/src/utils/naming.rs
use chrono::{DateTime, Local, TimeZone};

/// Artifact name for a backup taken now, e.g. `backup-05-03-2024-02_00.tar.gz`.
///
/// Call once per job and pass the result down: the compressor's output file and
/// the uploaded object key are both derived from it.
pub fn make_backup_name() -> String {
    backup_name_at(&Local::now())
}

pub fn backup_name_at<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("backup-{}.tar.gz", at.format("%d-%m-%Y-%H_%M"))
}
