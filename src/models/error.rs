use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to read config file '{path}': {cause}")]
    ConfigRead { path: PathBuf, cause: io::Error },

    #[error("Failed to parse config file '{path}': {cause}")]
    ConfigParse {
        path: PathBuf,
        cause: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Database size greater than {max} MB is not supported (requested {requested} MB)")]
    MaxDatabaseSize { requested: u32, max: u32 },

    #[error("Failed to open or create database file '{path}': {cause}")]
    DatabaseConnection {
        path: String,
        cause: rusqlite::Error,
    },

    #[error("Failed to get database connection: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Database query failed for '{operation}': {cause}")]
    DatabaseQuery {
        operation: String,
        cause: rusqlite::Error,
    },

    #[error("Failed to insert into {table}: {cause}")]
    DatabaseInsert {
        table: String,
        cause: rusqlite::Error,
    },

    #[error("Failed to delete from {table} for ID {id}: {cause}")]
    DatabaseDelete {
        table: String,
        id: i64,
        cause: rusqlite::Error,
    },

    #[error("Transaction {operation} failed: {cause}")]
    Transaction {
        operation: String,
        cause: rusqlite::Error,
    },

    #[error("Failed to copy file from '{from}' to '{to}': {cause}")]
    FileCopy {
        from: PathBuf,
        to: PathBuf,
        cause: io::Error,
    },

    #[error("Failed to get metadata for '{path}': {cause}")]
    MetadataError { path: PathBuf, cause: io::Error },

    #[error("Failed to install logger: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SinkError>;
