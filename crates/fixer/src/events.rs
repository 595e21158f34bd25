use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use chrono::{DateTime, Local};
use tokio::sync::mpsc::UnboundedSender;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    /// Debug entries are kept for export but never shown interactively
    pub fn is_visible(&self) -> bool {
        !matches!(self, LogLevel::Debug)
    }

    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Append-only record of everything a batch did.
///
/// One ordered sequence holds every entry; the visible stream is the same
/// sequence with DEBUG filtered out at the sink. Insertion order is the
/// chronological order and is never changed.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<Vec<LogEntry>>,
    visible: Option<UnboundedSender<String>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log that also forwards each non-DEBUG entry, formatted, to `sink`
    pub fn with_sink(sink: UnboundedSender<String>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            visible: Some(sink),
        }
    }

    pub fn emit(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        };

        // Forward under the lock so the sink sees entries in log order.
        let mut entries = self.lock();
        if level.is_visible() {
            if let Some(sink) = &self.visible {
                // A dropped receiver only means nobody is watching.
                let _ = sink.send(entry.to_string());
            }
        }
        entries.push(entry);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(LogLevel::Success, message);
    }

    /// Every entry, DEBUG included, in the order it was emitted
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    /// Entries a user would have seen
    pub fn visible_entries(&self) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.level.is_visible())
            .cloned()
            .collect()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.lock().iter().filter(|e| e.level == level).count()
    }

    /// Write the full log, DEBUG included, one entry per line
    pub fn export(&self, path: &Path) -> std::io::Result<()> {
        let text = self
            .lock()
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(path, text)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        // Entries are plain data; a panic elsewhere cannot leave them half-written.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One progress notification for the controller
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// 0 to 100
    pub percent: f64,
    pub status: String,
}
