pub mod logging;
pub mod naming;

pub use naming::make_backup_name;
