use crate::models::config_validator::validate_config;
use crate::models::error::{Result, SinkError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    pub database_file: String,
    #[serde(default = "bool_false")]
    pub store_timestamp_in_utc: bool,
    #[serde(default, with = "opt_duration_secs")]
    pub retention_period: Option<Duration>,
    #[serde(default, with = "opt_duration_secs")]
    pub retention_check_interval: Option<Duration>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Ceiling in megabytes before the store is rolled over at startup
    #[serde(default = "default_max_database_size")]
    pub max_database_size: u32,
    #[serde(default = "bool_true")]
    pub roll_over: bool,
    /// Longest time an event waits in the buffer before a partial batch is written
    #[serde(default = "default_flush_period", with = "duration_secs")]
    pub flush_period: Duration,
}

const fn bool_false() -> bool { false }
const fn bool_true() -> bool { true }
const fn default_batch_size() -> u32 { 100 }
const fn default_max_database_size() -> u32 { 10 }
const fn default_flush_period() -> Duration {
    Duration::from_secs(2)
}

impl SinkConfig {
    /// Configuration with every optional setting at its default
    pub fn new(database_file: impl Into<String>) -> Self {
        SinkConfig {
            database_file: database_file.into(),
            store_timestamp_in_utc: bool_false(),
            retention_period: None,
            retention_check_interval: None,
            batch_size: default_batch_size(),
            max_database_size: default_max_database_size(),
            roll_over: bool_true(),
            flush_period: default_flush_period(),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        is_in_memory_path(&self.database_file)
    }
}

/// True for SQLite names that open a private in-memory database
pub fn is_in_memory_path(db_file: &str) -> bool {
    db_file == ":memory:" || db_file.starts_with("file::memory:")
}

pub fn setup_config(config_file: String) -> Result<SinkConfig> {
    let config_path = PathBuf::from(config_file);

    let config_str = fs::read_to_string(&config_path).map_err(|cause| SinkError::ConfigRead {
        path: config_path.clone(),
        cause,
    })?;

    let config: SinkConfig = serde_json::from_str(&config_str).map_err(|cause| {
        SinkError::ConfigParse {
            path: config_path,
            cause,
        }
    })?;

    validate_config(&config)?;

    Ok(config)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}
