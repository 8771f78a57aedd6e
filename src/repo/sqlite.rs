use crate::models::config::is_in_memory_path;
use crate::models::error::{Result, SinkError};
use crate::models::log_row::LogRecord;
use crate::self_log;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub const LOGS_TABLE: &str = "Logs";

/// Longest a flush or sweep waits for the store before giving up
const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

type DbPool = Pool<SqliteConnectionManager>;

/// One pool per store file for the whole process, so every writer on a file
/// shares its single connection
static FILE_POOLS: Lazy<Mutex<HashMap<PathBuf, DbPool>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Rows removed by [`LogWriter::delete_all`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: usize,
    /// IDs that matched no row
    pub missing: Vec<i64>,
}

#[derive(Debug)]
struct SelfLogErrorHandler;

impl r2d2::HandleError<rusqlite::Error> for SelfLogErrorHandler {
    fn handle_error(&self, error: rusqlite::Error) {
        self_log!("Database pool error: {}", error);
    }
}

/// Exclusive handle on the log store.
///
/// The pool holds exactly one connection, so checking it out is the lock that
/// keeps flush workers and retention sweeps from running transactions against
/// the same file at once. Every writer opened on a file in this process, and
/// every clone, shares that connection. In-memory stores get a private pool.
#[derive(Clone)]
pub struct LogWriter {
    pool: DbPool,
    database_file: String,
}

impl LogWriter {
    pub fn open(db_file: &str) -> Result<Self> {
        // Surface a bad path immediately instead of after the pool's wait timeout
        Connection::open(db_file).map_err(|cause| SinkError::DatabaseConnection {
            path: db_file.to_string(),
            cause,
        })?;

        let pool = if is_in_memory_path(db_file) {
            build_pool(db_file)?
        } else {
            let key = fs::canonicalize(db_file).unwrap_or_else(|_| PathBuf::from(db_file));
            let mut pools = FILE_POOLS.lock().unwrap_or_else(PoisonError::into_inner);
            match pools.get(&key) {
                Some(pool) => pool.clone(),
                None => {
                    let pool = build_pool(db_file)?;
                    pools.insert(key, pool.clone());
                    pool
                }
            }
        };

        Ok(LogWriter {
            pool,
            database_file: db_file.to_string(),
        })
    }

    pub fn database_file(&self) -> &str {
        &self.database_file
    }

    /// Blocks until no other flush or sweep holds the store
    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn setup_database(&self) -> Result<()> {
        let setup_queries = "CREATE TABLE IF NOT EXISTS Logs(
            Id              integer not null
                constraint Logs_Id_pk
                    primary key autoincrement,
            Timestamp       datetime,
            Level           varchar(10),
            Exception       TEXT,
            RenderedMessage TEXT,
            Properties      TEXT);

        CREATE INDEX IF NOT EXISTS Logs_Timestamp_index
                on Logs (Timestamp);";

        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(|cause| SinkError::Transaction {
            operation: "begin".to_string(),
            cause,
        })?;
        // Dropping an uncommitted transaction rolls it back
        tx.execute_batch(setup_queries)
            .map_err(|cause| SinkError::DatabaseQuery {
                operation: "create tables".to_string(),
                cause,
            })?;
        tx.commit().map_err(|cause| SinkError::Transaction {
            operation: "commit".to_string(),
            cause,
        })?;
        Ok(())
    }

    /// Insert every record, all-or-nothing when `run_with_transaction` is set.
    ///
    /// Without a transaction, rows inserted before a failure stay committed.
    pub fn write_all(&self, records: &[LogRecord], run_with_transaction: bool) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection()?;

        if !run_with_transaction {
            return insert_records(&conn, records);
        }

        let tx = conn.transaction().map_err(|cause| SinkError::Transaction {
            operation: "begin".to_string(),
            cause,
        })?;

        match insert_records(&tx, records) {
            Ok(inserted) => {
                tx.commit().map_err(|cause| SinkError::Transaction {
                    operation: "commit".to_string(),
                    cause,
                })?;
                Ok(inserted)
            }
            Err(e) => {
                if let Err(cause) = tx.rollback() {
                    self_log!("Rollback of {} records failed: {}", records.len(), cause);
                }
                Err(e)
            }
        }
    }

    /// Delete rows by primary key in a single transaction.
    ///
    /// An ID that matches nothing is reported and skipped; any SQL error rolls
    /// back every deletion in the call.
    pub fn delete_all(&self, ids: &[i64]) -> Result<DeleteOutcome> {
        let mut outcome = DeleteOutcome::default();
        if ids.is_empty() {
            return Ok(outcome);
        }

        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(|cause| SinkError::Transaction {
            operation: "begin".to_string(),
            cause,
        })?;

        if let Err(e) = delete_rows(&tx, ids, &mut outcome) {
            if let Err(cause) = tx.rollback() {
                self_log!("Rollback of {} deletions failed: {}", ids.len(), cause);
            }
            return Err(e);
        }

        tx.commit().map_err(|cause| SinkError::Transaction {
            operation: "commit".to_string(),
            cause,
        })?;

        Ok(outcome)
    }

    /// Scan every row and return the IDs whose timestamp is at or before `cutoff`.
    /// Rows without a timestamp are never selected.
    pub fn expired_ids(&self, cutoff: NaiveDateTime) -> Result<Vec<i64>> {
        let conn = self.connection()?;
        let query_error = |cause| SinkError::DatabaseQuery {
            operation: "scan log timestamps".to_string(),
            cause,
        };

        let mut stmt = conn
            .prepare("SELECT Id, Timestamp FROM Logs ORDER BY Id")
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<NaiveDateTime>>(1)?))
            })
            .map_err(query_error)?;

        let mut ids = Vec::new();
        for row in rows {
            let (id, timestamp) = row.map_err(query_error)?;
            if matches!(timestamp, Some(ts) if ts <= cutoff) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Delete every log entry
    pub fn delete_all_logs(&self) -> Result<usize> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM Logs", [])
            .map_err(|cause| SinkError::DatabaseQuery {
                operation: "delete logs".to_string(),
                cause,
            })
    }

    pub fn count_logs(&self) -> Result<u64> {
        let conn = self.connection()?;
        conn.query_row("SELECT COUNT(*) FROM Logs", [], |row| row.get(0))
            .map_err(|cause| SinkError::DatabaseQuery {
                operation: "count logs".to_string(),
                cause,
            })
    }

    /// Fold the write-ahead log into the main file so its size and contents are current
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(|cause| SinkError::DatabaseQuery {
                operation: "wal checkpoint".to_string(),
                cause,
            })
    }

    #[cfg(test)]
    pub(crate) fn select_logs(&self) -> Result<Vec<LogRecord>> {
        let conn = self.connection()?;
        select_logs(&conn)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(sql)
            .map_err(|cause| SinkError::DatabaseQuery {
                operation: sql.to_string(),
                cause,
            })
    }
}

fn build_pool(db_file: &str) -> Result<DbPool> {
    let use_wal = !is_in_memory_path(db_file);

    let manager = SqliteConnectionManager::file(db_file).with_init(move |conn| {
        let mut pragmas = String::from(
            "PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        );

        if use_wal {
            pragmas.push_str(" PRAGMA journal_mode = WAL;");
        }

        conn.execute_batch(&pragmas)
    });

    // An in-memory store lives only as long as its connection, so never recycle it
    let pool = Pool::builder()
        .max_size(1)
        .max_lifetime(None)
        .idle_timeout(None)
        .connection_timeout(LOCK_WAIT_TIMEOUT)
        .error_handler(Box::new(SelfLogErrorHandler))
        .build(manager)?;
    Ok(pool)
}

fn insert_records(conn: &Connection, records: &[LogRecord]) -> Result<usize> {
    let insert_error = |cause| SinkError::DatabaseInsert {
        table: LOGS_TABLE.to_string(),
        cause,
    };

    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO Logs (Timestamp, Level, Exception, RenderedMessage, Properties)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(insert_error)?;

    for record in records {
        stmt.execute((
            &record.timestamp,
            &record.level,
            &record.exception,
            &record.rendered_message,
            &record.properties,
        ))
        .map_err(insert_error)?;
    }
    Ok(records.len())
}

fn delete_rows(conn: &Connection, ids: &[i64], outcome: &mut DeleteOutcome) -> Result<()> {
    let mut stmt = conn
        .prepare_cached("DELETE FROM Logs WHERE Id = ?1")
        .map_err(|cause| SinkError::DatabaseQuery {
            operation: "prepare delete".to_string(),
            cause,
        })?;

    for &id in ids {
        let affected = stmt
            .execute([id])
            .map_err(|cause| SinkError::DatabaseDelete {
                table: LOGS_TABLE.to_string(),
                id,
                cause,
            })?;
        if affected < 1 {
            self_log!("No log row with ID {} to delete", id);
            outcome.missing.push(id);
        } else {
            outcome.deleted += affected;
        }
    }
    Ok(())
}

/// Read back every row; used to inspect stores and rolled-over copies
#[cfg(test)]
pub(crate) fn select_logs(conn: &Connection) -> Result<Vec<LogRecord>> {
    let query_error = |cause| SinkError::DatabaseQuery {
        operation: "select logs".to_string(),
        cause,
    };

    let mut stmt = conn
        .prepare(
            "SELECT Id, Timestamp, Level, Exception, RenderedMessage, Properties
             FROM Logs ORDER BY Id",
        )
        .map_err(query_error)?;

    let rows = stmt
        .query_map([], |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                exception: row.get(3)?,
                rendered_message: row.get(4)?,
                properties: row.get(5)?,
            })
        })
        .map_err(query_error)?;

    rows.collect::<rusqlite::Result<Vec<LogRecord>>>()
        .map_err(query_error)
}
