use crate::models::config::SinkConfig;
use crate::models::error::Result;
use crate::models::log_event::LogEvent;
use crate::service::mapper::escape_template;
use crate::sink::SqliteSink;
use log::{LevelFilter, Log, Metadata, Record};

/// Targets never written to the store: the sink's own code and the storage
/// stack underneath it would otherwise log about their own writes
const INTERNAL_TARGETS: &[&str] = &[env!("CARGO_CRATE_NAME"), "r2d2", "rusqlite"];

/// `log` facade backend that writes records into a [`SqliteSink`]
pub struct DatabaseLogger {
    level: LevelFilter,
    sink: SqliteSink,
}

impl DatabaseLogger {
    pub fn new(sink: SqliteSink, level: LevelFilter) -> Self {
        DatabaseLogger { level, sink }
    }

    /// Get the log level filter
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn sink(&self) -> &SqliteSink {
        &self.sink
    }
}

fn is_internal(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|internal| {
        target == *internal
            || target
                .strip_prefix(internal)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

/// Build an event from a `log` record; the formatted text is stored verbatim
pub fn event_from_record(record: &Record) -> LogEvent {
    let mut event = LogEvent::new(record.level(), escape_template(&record.args().to_string()))
        .with_property("target", record.target());

    if let Some(module_path) = record.module_path() {
        event = event.with_property("module_path", module_path);
    }
    if let Some(file) = record.file() {
        event = event.with_property("file", file);
    }
    if let Some(line) = record.line() {
        event = event.with_property("line", line);
    }
    event
}

impl Log for DatabaseLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && !is_internal(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.sink.emit(event_from_record(record));
    }

    fn flush(&self) {
        self.sink.flush();
    }
}

/// Install a [`DatabaseLogger`] as the global logger.
///
/// The global logger is never dropped, so call `log::logger().flush()` before
/// the process exits to write out buffered records.
pub fn init_database_logger(config: SinkConfig, level: LevelFilter) -> Result<()> {
    let logger = DatabaseLogger::new(SqliteSink::new(config)?, level);
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}
