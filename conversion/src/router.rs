use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::fs::OpenOptions;

use services::config;

use crate::audit::{Action, AuditLog, LogEntry, Status};
use crate::error::RouteError;
use crate::pending::PendingSlot;

/// Highest queue number read from the configuration.
pub const MAX_CONFIGURED_QUEUES: u32 = 9;

/// Identifier of a queue, as typed by the operator. Starts at 1.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(u32);

impl QueueId {
    /// A queue identifier, or [`None`] for 0.
    ///
    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    /// The number of the queue.
    ///
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(QueueId::new)
            .ok_or_else(|| format!("'{}' is not a queue number", s))
    }
}

/// The fixed mapping from queue identifiers to destination directories.
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueTable {
    queues: BTreeMap<QueueId, PathBuf>,
}

impl QueueTable {
    /// Queues numbered 1, 2, ... in the order of `dirs`.
    ///
    pub fn from_dirs(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        let queues = dirs
            .into_iter()
            .zip(1..)
            .map(|(dir, id)| (QueueId(id), dir.into()))
            .collect();
        Self { queues }
    }

    /// Queues from the `QUEUE_1` to `QUEUE_9` configuration keys. Unset keys leave gaps.
    ///
    pub fn from_config() -> Self {
        let queues = (1..=MAX_CONFIGURED_QUEUES)
            .filter_map(|id| config().get(&format!("QUEUE_{}", id)).map(|dir| (QueueId(id), PathBuf::from(dir))))
            .collect();
        Self { queues }
    }

    /// Add or replace a queue.
    ///
    pub fn insert(&mut self, id: QueueId, dir: impl Into<PathBuf>) {
        self.queues.insert(id, dir.into());
    }

    /// The directory of queue `id`.
    ///
    pub fn get(&self, id: QueueId) -> Option<&Path> {
        self.queues.get(&id).map(PathBuf::as_path)
    }

    /// All queues in identifier order.
    ///
    pub fn iter(&self) -> impl Iterator<Item = (QueueId, &Path)> {
        self.queues.iter().map(|(id, dir)| (*id, dir.as_path()))
    }

    /// Number of queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Whether no queue is configured.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

/// Moves the pending artifact into a queue.
///
pub struct QueueRouter {
    queues: QueueTable,
    audit: Arc<dyn AuditLog>,
}

impl QueueRouter {
    /// A router over `queues`.
    ///
    pub fn new(queues: QueueTable, audit: Arc<dyn AuditLog>) -> Self {
        Self { queues, audit }
    }

    /// The configured queues.
    ///
    pub fn queues(&self) -> &QueueTable {
        &self.queues
    }

    /// Move the artifact pending in `slot` into queue `id`.
    ///
    /// The preview is released before the move. The slot is emptied only when the move succeeds; after any
    /// error the artifact stays pending and can be routed again.
    ///
    /// # Returns
    ///
    /// The path of the artifact inside the queue.
    ///
    pub async fn route(&self, slot: &mut PendingSlot, id: QueueId) -> Result<PathBuf, RouteError> {
        let Some(source) = slot.get().map(Path::to_path_buf) else {
            warn!("Nothing pending to send to queue {}", id);
            return Err(RouteError::NothingPending);
        };
        let Some(dir) = self.queues.get(id) else {
            warn!("Queue {} is not configured", id);
            return Err(RouteError::UnknownQueue(id));
        };
        let file = source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let destination = dir.join(&file);

        slot.release_preview().await;
        debug!("Moving '{}' to '{}'", source.display(), destination.display());
        match move_no_clobber(&source, &destination).await {
            Ok(()) => {
                slot.take();
                info!("Sent '{}' to queue {}", file, id);
                self.audit.record(
                    LogEntry::new(Action::Route, &file, Status::Success)
                        .with_message(format!("queue {}: {}", id, destination.display())),
                );
                Ok(destination)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                warn!("'{}' already exists in queue {}", file, id);
                self.audit.record(
                    LogEntry::new(Action::Route, &file, Status::Failure)
                        .with_message(format!("queue {}: {} already exists", id, destination.display())),
                );
                Err(RouteError::Collision { path: destination })
            }
            Err(err) => {
                warn!("Failed to send '{}' to queue {}: {}", file, id, err);
                self.audit.record(
                    LogEntry::new(Action::Route, &file, Status::Failure)
                        .with_message(format!("queue {}: {}", id, err)),
                );
                Err(RouteError::Io { from: source, to: destination, source: err })
            }
        }
    }
}

/// Move `from` to `to`, failing with [`io::ErrorKind::AlreadyExists`] instead of replacing `to`.
///
/// A hard link followed by removing `from` keeps the move atomic on one volume. Where linking is not
/// possible the file is copied into an exclusively created `to` instead.
///
pub async fn move_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::hard_link(from, to).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Err(err),
        Err(err) => {
            debug!("Cannot link '{}' ({}), copying instead", to.display(), err);
            return copy_no_clobber(from, to).await;
        }
    }
    if let Err(err) = tokio::fs::remove_file(from).await {
        let _ = tokio::fs::remove_file(to).await;
        return Err(err);
    }
    Ok(())
}

async fn copy_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    let mut source = tokio::fs::File::open(from).await?;
    let mut target = OpenOptions::new().write(true).create_new(true).open(to).await?;

    let copied = async {
        tokio::io::copy(&mut source, &mut target).await?;
        target.sync_all().await
    }
    .await;
    drop(target);
    if let Err(err) = copied {
        let _ = tokio::fs::remove_file(to).await;
        return Err(err);
    }

    drop(source);
    if let Err(err) = tokio::fs::remove_file(from).await {
        let _ = tokio::fs::remove_file(to).await;
        return Err(err);
    }
    Ok(())
}
