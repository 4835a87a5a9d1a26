use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use mail::BodyFormat;
use services::config;

use crate::audit::{Action, AuditLog, LogEntry, Status};

/// Name of the working directory, created under the temp root.
///
pub const APP_ID: &str = "email-pdf-router";

/// The directory conversions write their intermediate files and artifacts into.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// A workspace at `<root>/email-pdf-router`.
    ///
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { dir: root.as_ref().join(APP_ID) }
    }

    /// A workspace under `WORKSPACE_ROOT`, or under the platform temp directory if unset.
    ///
    pub fn from_config() -> Self {
        let root = config()
            .get("WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self::new(root)
    }

    /// The working directory.
    ///
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the working directory if it does not exist yet.
    ///
    pub async fn ensure(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Where the body of the email named `base` is saved before rendering.
    ///
    pub fn body_snapshot(&self, base: &str, format: BodyFormat) -> PathBuf {
        self.dir.join(format!("{}_email.{}", base, format.extension()))
    }

    /// Where the merged PDF of the email named `base` is written.
    ///
    pub fn artifact(&self, base: &str) -> PathBuf {
        self.dir.join(format!("{}.pdf", base))
    }

    /// Where an attachment with the (already sanitized) `file_name` is materialized.
    ///
    pub fn attachment(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }
}

/// Remove a file, logging instead of failing.
///
/// A file that is already gone counts as removed.
///
pub async fn remove_quietly(path: &Path) -> Result<(), io::Error> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed '{}'", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            warn!("Failed to remove '{}': {}", path.display(), err);
            Err(err)
        }
    }
}

/// Result of a best-effort cleanup pass.
///
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Files that no longer exist.
    pub removed: Vec<PathBuf>,
    /// Files that could not be removed, with the reason.
    pub failed: Vec<(PathBuf, io::Error)>,
}

impl CleanupReport {
    /// Whether every file was removed.
    ///
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Removes every path except `keep`, each independently of the others.
///
/// Failures are collected and audited, never returned as an error.
///
pub async fn cleanup<'a>(
    paths: impl IntoIterator<Item = &'a Path>,
    keep: Option<&Path>,
    audit: &dyn AuditLog,
    file: &str,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    for path in paths {
        if keep.is_some_and(|keep| keep == path) {
            continue;
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        match remove_quietly(path).await {
            Ok(()) => {
                audit.record(LogEntry::new(Action::Cleanup, file, Status::Deleted).with_message(name));
                report.removed.push(path.to_path_buf());
            }
            Err(err) => {
                audit.record(
                    LogEntry::new(Action::Cleanup, file, Status::Failure)
                        .with_message(format!("{}: {}", name, err)),
                );
                report.failed.push((path.to_path_buf(), err));
            }
        }
    }
    report
}
