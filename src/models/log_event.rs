use chrono::{DateTime, FixedOffset, Local};
use log::Level;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Write;

/// An immutable log event as handed to the sink by a producer
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<FixedOffset>,
    pub level: Level,
    /// Message template; `{Name}` holes are filled from `properties` when rendered
    pub message_template: String,
    pub exception: Option<String>,
    pub properties: BTreeMap<String, Value>,
}

impl LogEvent {
    /// Create an event stamped with the current local time
    pub fn new(level: Level, message_template: impl Into<String>) -> Self {
        LogEvent {
            timestamp: Local::now().fixed_offset(),
            level,
            message_template: message_template.into(),
            exception: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// Attach an error, including every `source()` in its chain
    pub fn with_error(self, error: &(dyn Error + 'static)) -> Self {
        let mut text = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            let _ = write!(text, "\nCaused by: {}", cause);
            source = cause.source();
        }
        self.with_exception(text)
    }
}
