use crate::models::config::{is_in_memory_path, SinkConfig};
use crate::models::error::{Result, SinkError};
use crate::self_log;
use crate::service::batch::MAX_FLUSH_PERIOD;
use crate::service::retention::MAX_CHECK_INTERVAL;
use crate::service::rollover::MAX_SUPPORTED_DATABASE_SIZE;
use std::fs;
use std::path::Path;

/// Validates the entire configuration. Performs no writes.
pub fn validate_config(config: &SinkConfig) -> Result<()> {
    validate_database_size(config.max_database_size)?;

    validate_numeric_values(config)?;

    validate_database_path(&config.database_file)?;

    check_retention_settings(config);

    Ok(())
}

/// Reject ceilings above what SQLite can address with the default page settings
pub fn validate_database_size(max_database_size: u32) -> Result<()> {
    if max_database_size > MAX_SUPPORTED_DATABASE_SIZE {
        return Err(SinkError::MaxDatabaseSize {
            requested: max_database_size,
            max: MAX_SUPPORTED_DATABASE_SIZE,
        });
    }
    Ok(())
}

fn validate_numeric_values(config: &SinkConfig) -> Result<()> {
    if config.batch_size == 0 {
        return Err(SinkError::Configuration(
            "batch_size must be greater than 0".to_string(),
        ));
    }

    if config.flush_period.is_zero() {
        return Err(SinkError::Configuration(
            "flush_period must be greater than 0 seconds".to_string(),
        ));
    }

    if config.flush_period > MAX_FLUSH_PERIOD {
        return Err(SinkError::Configuration(format!(
            "flush_period must be at most {} seconds",
            MAX_FLUSH_PERIOD.as_secs()
        )));
    }

    if config
        .retention_check_interval
        .is_some_and(|interval| interval > MAX_CHECK_INTERVAL)
    {
        return Err(SinkError::Configuration(format!(
            "retention_check_interval must be at most {} seconds",
            MAX_CHECK_INTERVAL.as_secs()
        )));
    }

    Ok(())
}

fn validate_database_path(db_file: &str) -> Result<()> {
    if db_file.is_empty() {
        return Err(SinkError::Configuration(
            "Database file path cannot be empty. Provide a valid path or use ':memory:' for an in-memory database.".to_string(),
        ));
    }

    if is_in_memory_path(db_file) {
        return Ok(());
    }

    let path = Path::new(db_file);

    if path.exists() {
        if !path.is_file() {
            return Err(SinkError::Configuration(format!(
                "Database path exists but is not a file: {}",
                db_file
            )));
        }

        if let Err(e) = fs::OpenOptions::new().read(true).write(true).open(path) {
            return Err(SinkError::Configuration(format!(
                "Database file is not readable/writable: {}\nError: {}",
                db_file, e
            )));
        }
    } else {
        let parent_exists = match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => true,
            Some(parent) => parent.is_dir(),
            None => false,
        };

        if !parent_exists {
            return Err(SinkError::Configuration(format!(
                "Database parent directory does not exist: {}",
                db_file
            )));
        }
    }

    Ok(())
}

fn check_retention_settings(config: &SinkConfig) {
    if config.retention_period.is_none() && config.retention_check_interval.is_some() {
        self_log!("retention_check_interval is set without retention_period and has no effect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_database_size_at_cap_is_accepted() {
        assert!(validate_database_size(MAX_SUPPORTED_DATABASE_SIZE).is_ok());
    }

    #[test]
    fn test_database_size_above_cap_is_rejected() {
        let result = validate_database_size(MAX_SUPPORTED_DATABASE_SIZE + 1);
        match result {
            Err(SinkError::MaxDatabaseSize { requested, max }) => {
                assert_eq!(requested, MAX_SUPPORTED_DATABASE_SIZE + 1);
                assert_eq!(max, 20_480);
            }
            _ => panic!("Expected MaxDatabaseSize error"),
        }
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let mut config = SinkConfig::new(":memory:");
        config.batch_size = 0;

        let result = validate_config(&config);
        assert!(matches!(result, Err(SinkError::Configuration(_))));
    }

    #[test]
    fn test_zero_flush_period_is_rejected() {
        let mut config = SinkConfig::new(":memory:");
        config.flush_period = Duration::ZERO;

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_oversized_flush_period_is_rejected() {
        let mut config = SinkConfig::new(":memory:");
        config.flush_period = Duration::from_secs(u64::MAX);
        assert!(matches!(validate_config(&config), Err(SinkError::Configuration(_))));

        config.flush_period = MAX_FLUSH_PERIOD;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_oversized_retention_check_interval_is_rejected() {
        let mut config = SinkConfig::new(":memory:");
        config.retention_period = Some(Duration::from_secs(86400));
        config.retention_check_interval = Some(Duration::from_secs(u64::MAX));
        assert!(matches!(validate_config(&config), Err(SinkError::Configuration(_))));

        config.retention_check_interval = Some(MAX_CHECK_INTERVAL);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_database_path_is_rejected() {
        let config = SinkConfig::new("");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_missing_parent_directory_is_rejected() {
        let config = SinkConfig::new("/this/does/not/exist/logs.db");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_directory_as_database_path_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = SinkConfig::new(temp_dir.path().to_str().unwrap());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_new_file_in_existing_directory_is_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("logs.db");
        let config = SinkConfig::new(db_path.to_str().unwrap());

        assert!(validate_config(&config).is_ok());
        assert!(!db_path.exists());
    }
}
