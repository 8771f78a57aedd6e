use crate::models::config::SinkConfig;
use crate::models::config_validator::validate_config;
use crate::models::error::Result;
use crate::models::log_event::LogEvent;
use crate::repo::sqlite::LogWriter;
use crate::self_log;
use crate::service::batch::{spawn_flush_worker, BatchQueue, MAX_BUFFER_SIZE};
use crate::service::retention::{RetentionPolicy, RetentionTask};
use crate::service::rollover::roll_database;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

/// Buffered SQLite log sink.
///
/// Construction validates the configuration, creates the Logs table, rolls
/// an oversized store over and starts the flush worker and, when a retention
/// period is set, the retention timer. `emit` only touches the in-memory
/// buffer. Dropping the sink drains the buffer before closing the store.
pub struct SqliteSink {
    config: SinkConfig,
    queue: Arc<BatchQueue>,
    writer: LogWriter,
    worker: Mutex<Option<JoinHandle<()>>>,
    retention: Mutex<Option<RetentionTask>>,
}

impl SqliteSink {
    pub fn new(config: SinkConfig) -> Result<Self> {
        validate_config(&config)?;

        let writer = LogWriter::open(&config.database_file)?;
        writer.setup_database()?;

        if config.roll_over && !config.is_in_memory() {
            roll_database(&writer, config.max_database_size);
        }

        let retention = match config.retention_period {
            Some(period) => {
                let policy = RetentionPolicy::new(period, config.retention_check_interval);
                Some(RetentionTask::start(
                    writer.clone(),
                    policy,
                    config.store_timestamp_in_utc,
                )?)
            }
            None => None,
        };

        let queue = Arc::new(BatchQueue::new(MAX_BUFFER_SIZE, config.batch_size as usize));
        let worker = spawn_flush_worker(
            queue.clone(),
            writer.clone(),
            config.store_timestamp_in_utc,
            config.flush_period,
        )?;

        Ok(SqliteSink {
            config,
            queue,
            writer,
            worker: Mutex::new(Some(worker)),
            retention: Mutex::new(retention),
        })
    }

    /// Queue an event for the next batch. Never blocks on storage.
    pub fn emit(&self, event: LogEvent) {
        if !self.queue.push(event) {
            self_log!("Log event emitted after shutdown was discarded");
        }
    }

    /// Wait until every event emitted so far has been written or dropped
    pub fn flush(&self) {
        self.queue.flush();
    }

    /// Drain the buffer, then stop the retention timer. Safe to call more than once.
    pub fn shutdown(&self) {
        self.queue.close();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                self_log!("Flush worker panicked; buffered events were lost");
            }
        }

        let retention = self
            .retention
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut retention) = retention {
            retention.stop();
        }
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Events buffered and not yet handed to storage
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn writer(&self) -> &LogWriter {
        &self.writer
    }
}

impl Drop for SqliteSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}
