//! Buffered log sink that batches structured events into a SQLite store.
//!
//! Events are queued in memory and written by a background worker in
//! transactional batches. At startup an oversized store is copied aside and
//! emptied; with a retention period configured, a timer thread deletes rows
//! older than the window. Failures inside the sink never reach the caller and
//! are reported through [`utils::self_log`].

pub mod models;
pub mod repo;
pub mod service;
pub mod sink;
pub mod utils;

pub use models::config::{setup_config, SinkConfig};
pub use models::error::{Result, SinkError};
pub use models::log_event::LogEvent;
pub use sink::SqliteSink;
pub use utils::db_logger::{init_database_logger, DatabaseLogger};
