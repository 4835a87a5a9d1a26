use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use log::warn;

/// Step of the workflow an audit entry is about.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// A whole email conversion.
    Convert,
    /// Saving the body snapshot.
    SaveBody,
    /// Rendering the body snapshot to PDF.
    RenderBody,
    /// Converting one attachment.
    ConvertAttachment,
    /// Merging the body and attachment PDFs.
    Merge,
    /// Removing an intermediate file.
    Cleanup,
    /// Moving the pending artifact into a queue.
    Route,
    /// Dropping the pending artifact.
    Discard,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Convert => "Convert",
            Action::SaveBody => "SaveBody",
            Action::RenderBody => "RenderBody",
            Action::ConvertAttachment => "ConvertAttachment",
            Action::Merge => "Merge",
            Action::Cleanup => "Cleanup",
            Action::Route => "Route",
            Action::Discard => "Discard",
        };
        f.write_str(name)
    }
}

/// Outcome recorded by an audit entry.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    #[allow(missing_docs)]
    Started,
    #[allow(missing_docs)]
    Success,
    #[allow(missing_docs)]
    Failure,
    #[allow(missing_docs)]
    Deleted,
    #[allow(missing_docs)]
    Completed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One line of the audit log.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// When the entry was created.
    pub timestamp: DateTime<Local>,
    /// The step the entry is about.
    pub action: Action,
    /// The file the step worked on, usually the sanitized subject.
    pub file: String,
    /// The outcome of the step.
    pub status: Status,
    /// Optional detail, e.g. an error description.
    pub message: Option<String>,
}

impl LogEntry {
    /// Create an entry timestamped now.
    ///
    pub fn new(action: Action, file: impl Into<String>, status: Status) -> Self {
        Self {
            timestamp: Local::now(),
            action,
            file: file.into(),
            status,
            message: None,
        }
    }

    /// Attach a detail message.
    ///
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The entry as a single line: `timestamp, action, file, status, message`.
    ///
    /// Line breaks inside the message are flattened so every entry stays on one line.
    ///
    pub fn to_line(&self) -> String {
        let message = self
            .message
            .as_deref()
            .unwrap_or_default()
            .replace(['\r', '\n'], " ");
        format!(
            "{}, {}, {}, {}, {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.action,
            self.file,
            self.status,
            message
        )
    }
}

/// Append-only sink for [`LogEntry`] records.
///
/// Recording never fails from the caller's point of view; sinks report their own write errors.
///
pub trait AuditLog: Send + Sync {
    /// Append an entry.
    ///
    fn record(&self, entry: LogEntry);
}

/// Audit log writing one line per entry to a file.
///
#[derive(Debug)]
pub struct FileAuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileAuditLog {
    /// Create a sink appending to `path`. The file is created on first write.
    ///
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The file entries are appended to.
    ///
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

impl AuditLog for FileAuditLog {
    fn record(&self, entry: LogEntry) {
        if let Err(err) = self.append(&entry.to_line()) {
            warn!("Failed to write audit log '{}': {}", self.path.display(), err);
        }
    }
}

/// Audit log that drops every entry.
///
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditLog;

impl AuditLog for NullAuditLog {
    fn record(&self, _entry: LogEntry) {}
}

/// Audit log keeping entries in memory.
///
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryAuditLog {
    /// A copy of every entry recorded so far.
    ///
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// `(action, status)` of every entry, in order.
    ///
    pub fn outcomes(&self) -> Vec<(Action, Status)> {
        self.entries().iter().map(|e| (e.action, e.status)).collect()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, entry: LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_line() {
        let entry = LogEntry::new(Action::SaveBody, "Q3 Report", Status::Failure)
            .with_message("store busy\nretrying");

        let line = entry.to_line();

        assert!(line.ends_with(", SaveBody, Q3 Report, Failure, store busy retrying"));
        assert_eq!(line.split(", ").count(), 5);
    }

    #[test]
    fn test_file_audit_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileAuditLog::new(dir.path().join("audit.log"));

        log.record(LogEntry::new(Action::Convert, "Q3 Report", Status::Started));
        log.record(LogEntry::new(Action::Convert, "Q3 Report", Status::Completed));

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Convert, Q3 Report, Started, "));
        assert!(lines[1].ends_with("Convert, Q3 Report, Completed, "));
    }

    #[test]
    fn test_unwritable_audit_log_does_not_panic() {
        let log = FileAuditLog::new("/nonexistent/dir/audit.log");

        log.record(LogEntry::new(Action::Route, "Q3 Report", Status::Success));
    }
}
