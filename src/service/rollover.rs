use crate::models::config::is_in_memory_path;
use crate::models::error::{Result, SinkError};
use crate::repo::sqlite::LogWriter;
use crate::self_log;
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

pub const BYTES_PER_MB: u64 = 1_048_576;
const MAX_SUPPORTED_PAGES: u64 = 5_242_880;
const MAX_SUPPORTED_PAGE_SIZE: u64 = 4096;

/// Largest `max_database_size` (MB) accepted: max page count times max page size
pub const MAX_SUPPORTED_DATABASE_SIZE: u32 =
    (MAX_SUPPORTED_PAGE_SIZE * MAX_SUPPORTED_PAGES / BYTES_PER_MB) as u32;

/// `<dir>/<stem>-<YYYYMMDD_HHmmss.ff><ext>` next to the live store
pub fn rolled_file_path(db_path: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Logs".to_string());
    let extension = db_path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let stamp = format!(
        "{}.{:02}",
        now.format("%Y%m%d_%H%M%S"),
        now.timestamp_subsec_millis() / 10
    );

    let file_name = format!("{}-{}{}", stem, stamp, extension);
    match db_path.parent() {
        Some(dir) => dir.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// Archive an oversized store and empty its log table.
///
/// Returns the archive path when a rollover happened. Failures are reported
/// to the diagnostics channel and the live store is left in use as it is.
pub fn roll_database(writer: &LogWriter, max_database_size: u32) -> Option<PathBuf> {
    roll_database_at(writer, max_database_size, Local::now())
}

fn roll_database_at(
    writer: &LogWriter,
    max_database_size: u32,
    now: DateTime<Local>,
) -> Option<PathBuf> {
    match try_roll_database(writer, max_database_size, now) {
        Ok(rolled) => rolled,
        Err(e) => {
            self_log!("Rollover of {} failed: {}", writer.database_file(), e);
            None
        }
    }
}

fn try_roll_database(
    writer: &LogWriter,
    max_database_size: u32,
    now: DateTime<Local>,
) -> Result<Option<PathBuf>> {
    let db_file = writer.database_file();
    if is_in_memory_path(db_file) {
        return Ok(None);
    }
    let db_path = Path::new(db_file);

    writer.checkpoint()?;

    let size = fs::metadata(db_path)
        .map_err(|cause| SinkError::MetadataError {
            path: db_path.to_path_buf(),
            cause,
        })?
        .len();

    let max_bytes = u64::from(max_database_size) * BYTES_PER_MB;
    if size <= max_bytes {
        return Ok(None);
    }

    let rolled_path = rolled_file_path(db_path, now);
    fs::copy(db_path, &rolled_path).map_err(|cause| SinkError::FileCopy {
        from: db_path.to_path_buf(),
        to: rolled_path.clone(),
        cause,
    })?;

    let removed = writer.delete_all_logs()?;
    self_log!(
        "Rolling database to {} ({} bytes, {} records archived)",
        rolled_path.display(),
        size,
        removed
    );

    Ok(Some(rolled_path))
}
