use anyhow::{Context, Result};
use clap::Parser;
use log::{info, Level};
use serde::Deserialize;
use serde_json::Value;
use sqlite_log_sink::service::mapper::escape_template;
use sqlite_log_sink::utils::self_log;
use sqlite_log_sink::{setup_config, LogEvent, SqliteSink};
use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sqlite-log-sink")]
#[command(about = "Batch log events from stdin into a SQLite store", long_about = None)]
struct Cli {
    #[arg(
        short = 'c',
        long = "config",
        default_value = "sink.json",
        env = "SQLITE_LOG_SINK_CONFIG"
    )]
    config_file: String,

    #[arg(
        short = 'l',
        long = "log-level",
        default_value = "info",
        env = "LOG_LEVEL"
    )]
    log_level: String,

    #[arg(short = 'v', long = "validate-only")]
    validate_only: bool,
}

/// One JSON line on stdin
#[derive(Debug, Deserialize)]
struct InputEvent {
    #[serde(default = "default_level")]
    level: String,
    message: String,
    #[serde(default)]
    exception: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

fn default_level() -> String {
    "info".to_string()
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "fatal" | "critical" => Level::Error,
        "warning" => Level::Warn,
        "information" => Level::Info,
        "verbose" => Level::Trace,
        other => Level::from_str(other).unwrap_or(Level::Info),
    }
}

/// JSON object lines become structured events; anything else is an INFO message
fn parse_line(line: &str) -> LogEvent {
    if line.trim_start().starts_with('{') {
        if let Ok(input) = serde_json::from_str::<InputEvent>(line) {
            let mut event = LogEvent::new(parse_level(&input.level), input.message);
            event.exception = input.exception;
            event.properties = input.properties;
            return event;
        }
    }
    LogEvent::new(Level::Info, escape_template(line))
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();

    // The store is not the console logger here, so sink diagnostics can go through env_logger
    self_log::enable(|message| log::warn!(target: "sqlite_log_sink::self_log", "{}", message));

    info!("sqlite-log-sink starting...");
    let config = setup_config(args.config_file).context("Failed to load configuration")?;

    if args.validate_only {
        info!("Configuration is valid. Exiting (--validate-only mode).");
        return Ok(());
    }

    let database_file = config.database_file.clone();
    let sink = Arc::new(SqliteSink::new(config).context("Failed to open log sink")?);

    let handler_sink = sink.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, flushing buffered events...");
        handler_sink.shutdown();
        std::process::exit(0);
    })
    .context("Failed to set Ctrl+C handler")?;

    info!("Reading log events from stdin into {}", database_file);
    let mut received: u64 = 0;
    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        sink.emit(parse_line(&line));
        received += 1;
    }

    sink.shutdown();
    info!("Done: {} events written to {}", received, database_file);
    Ok(())
}
