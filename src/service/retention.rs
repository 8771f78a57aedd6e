use crate::models::error::Result;
use crate::repo::sqlite::{DeleteOutcome, LogWriter};
use crate::self_log;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sweeps never run more often than this, and always on a multiple of it
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const MIN_RETENTION_PERIOD: Duration = Duration::from_secs(30 * 60);
/// Longest accepted `retention_check_interval`
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Rows at least this old are deleted
    pub period: Duration,
    pub check_interval: Duration,
}

impl RetentionPolicy {
    /// Normalize the requested settings: the interval is between 15 minutes
    /// and 30 days, rounded down to a multiple of 15 minutes; the period is at
    /// least 30 minutes.
    pub fn new(period: Duration, check_interval: Option<Duration>) -> Self {
        let step = MIN_CHECK_INTERVAL.as_secs();
        let requested = check_interval
            .unwrap_or(MIN_CHECK_INTERVAL)
            .clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL)
            .as_secs();

        RetentionPolicy {
            period: period.max(MIN_RETENTION_PERIOD),
            check_interval: Duration::from_secs(requested / step * step),
        }
    }

    /// Newest timestamp that is deleted when sweeping at `now`, in the
    /// store's timestamp convention
    pub fn cutoff(&self, now: DateTime<Utc>, store_timestamp_in_utc: bool) -> NaiveDateTime {
        let earliest = chrono::Duration::from_std(self.period)
            .ok()
            .and_then(|period| now.checked_sub_signed(period))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        if store_timestamp_in_utc {
            earliest.naive_utc()
        } else {
            earliest.with_timezone(&Local).naive_local()
        }
    }
}

/// One prune pass as of `now`
pub fn sweep(
    writer: &LogWriter,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    store_timestamp_in_utc: bool,
) -> Result<DeleteOutcome> {
    let cutoff = policy.cutoff(now, store_timestamp_in_utc);
    self_log!("Deleting log entries older than {}", cutoff);

    let expired = writer.expired_ids(cutoff)?;
    if expired.is_empty() {
        return Ok(DeleteOutcome::default());
    }

    let outcome = writer.delete_all(&expired)?;
    self_log!(
        "{} of {} expired records deleted",
        outcome.deleted,
        expired.len()
    );
    Ok(outcome)
}

/// Sweep as of the current time, reporting instead of returning errors
pub fn apply_retention_policy(
    writer: &LogWriter,
    policy: &RetentionPolicy,
    store_timestamp_in_utc: bool,
) {
    if let Err(e) = sweep(writer, policy, Utc::now(), store_timestamp_in_utc) {
        self_log!("Retention sweep failed: {}", e);
    }
}

/// Timer thread running [`apply_retention_policy`] immediately and then
/// every `check_interval`. Sweeps run on that one thread, so they never overlap.
pub struct RetentionTask {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RetentionTask {
    pub fn start(
        writer: LogWriter,
        policy: RetentionPolicy,
        store_timestamp_in_utc: bool,
    ) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("log-sink-retention".to_string())
            .spawn(move || {
                let interval = policy
                    .check_interval
                    .clamp(Duration::from_millis(1), MAX_CHECK_INTERVAL);
                let mut next = Instant::now();
                loop {
                    apply_retention_policy(&writer, &policy, store_timestamp_in_utc);

                    // Skip ticks missed while a slow sweep was running
                    let now = Instant::now();
                    next += interval;
                    while next <= now {
                        next += interval;
                    }

                    match stopped.recv_timeout(next - now) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
            })?;

        Ok(RetentionTask {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stop the timer, waiting for a sweep in progress to finish
    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                self_log!("Retention thread panicked");
            }
        }
    }
}

impl Drop for RetentionTask {
    fn drop(&mut self) {
        self.stop();
    }
}
