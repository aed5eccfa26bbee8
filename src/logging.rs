//! Log sinks for application output.
//!
//! Applications never print diagnostics to the screen they share; they
//! hand leveled text records to a [`LogSink`] provided by the runtime.
//! [`TracingSink`] forwards records into the `tracing` ecosystem and is
//! the default. [`MemorySink`] captures records in memory so a test
//! harness can assert on them after a run.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing_subscriber::FmtSubscriber;

pub use tracing::Level;

/// Destination for leveled text records emitted by applications.
///
/// Implementations must be callable from application threads, so the
/// trait requires `Send + Sync` and takes `&self`.
pub trait LogSink: Send + Sync {
    fn record(&self, level: Level, message: &str);
}

/// Forwards records to the global `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!("{}", message),
            Level::WARN => tracing::warn!("{}", message),
            Level::INFO => tracing::info!("{}", message),
            Level::DEBUG => tracing::debug!("{}", message),
            Level::TRACE => tracing::trace!("{}", message),
        }
    }
}

/// Captures records in memory. Clones share the same buffer, so a test
/// can keep one handle and give the other to the runtime.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<(Level, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured records in arrival order
    pub fn records(&self) -> Vec<(Level, String)> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Captured messages without their levels
    pub fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|(_, m)| m).collect()
    }

    /// Whether any captured message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|(_, m)| m.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn record(&self, level: Level, message: &str) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }
}

/// Initialize file logging to `~/.appmux/appmux.log`.
///
/// The screen belongs to the managed applications, so diagnostics go to
/// a file instead of stderr. Returns the log path, or `None` if the
/// file could not be opened or a global subscriber was already set.
pub fn init_file_logging(level: Level) -> Option<PathBuf> {
    let home = std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from);

    let log_path = home
        .map(|h| h.join(".appmux").join("appmux.log"))
        .unwrap_or_else(|| PathBuf::from("appmux.log"));

    // Create log directory if needed
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    // Open log file (append mode)
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok()?;

    Some(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_captures_in_order() {
        let sink = MemorySink::new();
        sink.record(Level::INFO, "first");
        sink.record(Level::WARN, "second");

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (Level::INFO, "first".to_string()));
        assert_eq!(records[1], (Level::WARN, "second".to_string()));
    }

    #[test]
    fn test_memory_sink_clones_share_buffer() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        sink.record(Level::INFO, "hello");
        assert!(handle.contains("hello"));
        assert_eq!(handle.messages(), vec!["hello".to_string()]);
    }
}
