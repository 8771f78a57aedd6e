//! Diagnostics side channel for the sink's own failures.
//!
//! The sink cannot report its problems through the log stream it is writing,
//! so transaction rollbacks, rollover failures and retention errors are sent
//! here instead. Output is disabled until a handler is installed.

use once_cell::sync::Lazy;
use std::fmt;
use std::sync::RwLock;

type Handler = Box<dyn Fn(&str) + Send + Sync>;

static SELF_LOG: Lazy<RwLock<Option<Handler>>> = Lazy::new(|| RwLock::new(None));

/// Route diagnostics to `handler`, replacing any previous one
pub fn enable<F>(handler: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    if let Ok(mut slot) = SELF_LOG.write() {
        *slot = Some(Box::new(handler));
    }
}

/// Route diagnostics to stderr
pub fn enable_stderr() {
    enable(|message| eprintln!("{}", message));
}

pub fn disable() {
    if let Ok(mut slot) = SELF_LOG.write() {
        *slot = None;
    }
}

pub fn is_enabled() -> bool {
    SELF_LOG.read().map(|slot| slot.is_some()).unwrap_or(false)
}

/// Write one timestamped line. Never panics, even if a handler did before.
pub fn write_line(args: fmt::Arguments<'_>) {
    let slot = match SELF_LOG.read() {
        Ok(slot) => slot,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(handler) = slot.as_ref() {
        let message = format!(
            "[{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            args
        );
        handler(&message);
    }
}

/// Format and send a line to the diagnostics side channel
#[macro_export]
macro_rules! self_log {
    ($($arg:tt)*) => {
        $crate::utils::self_log::write_line(format_args!($($arg)*))
    };
}

#[cfg(test)]
pub(crate) mod capture {
    use std::sync::{Arc, Mutex};

    /// Install a handler that records every line, for assertions in tests
    pub fn install() -> Arc<Mutex<Vec<String>>> {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        super::enable(move |message| sink.lock().unwrap().push(message.to_string()));
        lines
    }
}
