use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use mail::MailItem;

use crate::audit::{Action, LogEntry, Status};
use crate::converter::Converter;
use crate::error::{ConversionError, RouteError};
use crate::pending::{PendingSlot, Previewer};
use crate::router::{QueueId, QueueRouter, QueueTable};
use crate::workspace::remove_quietly;

/// The operator's actions on the pending artifact: make a preview, send it to a queue, or discard it.
///
/// Actions take `&mut self`, so they never overlap.
///
pub struct Session {
    converter: Converter,
    router: QueueRouter,
    previewer: Arc<dyn Previewer>,
    slot: PendingSlot,
}

impl Session {
    /// A session routing into `queues`.
    ///
    /// The router records into the same audit log as `converter`.
    ///
    pub fn new(converter: Converter, queues: QueueTable, previewer: Arc<dyn Previewer>) -> Self {
        let router = QueueRouter::new(queues, converter.audit().clone());
        Self {
            converter,
            router,
            previewer,
            slot: PendingSlot::default(),
        }
    }

    /// The pending artifact, if any.
    ///
    pub fn pending(&self) -> Option<&Path> {
        self.slot.get()
    }

    /// Whether the pending artifact is being previewed.
    ///
    pub fn is_previewed(&self) -> bool {
        self.slot.is_previewed()
    }

    /// The configured queues.
    ///
    pub fn queues(&self) -> &QueueTable {
        self.router.queues()
    }

    /// Convert `email` and preview the result, making it the pending artifact.
    ///
    /// A previously pending artifact at another path is deleted. When the conversion fails the previous
    /// artifact stays pending. A preview that fails to open is logged only.
    ///
    pub async fn make_preview(&mut self, email: &dyn MailItem) -> Result<PathBuf, ConversionError> {
        self.slot.release_preview().await;
        let keep: Vec<PathBuf> = self.slot.get().map(Path::to_path_buf).into_iter().collect();
        let artifact = self.converter.convert_reserving(email, &keep).await?;

        if let Some(previous) = self.slot.replace(&artifact) {
            let previous = previous.into_path().await;
            if previous != artifact {
                self.delete_abandoned(&previous).await;
            }
        }

        match self.previewer.open(&artifact).await {
            Ok(lease) => {
                if let Err(lease) = self.slot.set_lease(lease) {
                    let _ = lease.release().await;
                }
            }
            Err(err) => warn!("Failed to preview '{}': {:#}", artifact.display(), err),
        }
        Ok(artifact)
    }

    /// Send the pending artifact to queue `id`.
    ///
    pub async fn send_to_queue(&mut self, id: QueueId) -> Result<PathBuf, RouteError> {
        self.router.route(&mut self.slot, id).await
    }

    /// Close the preview and delete the pending artifact.
    ///
    /// # Returns
    ///
    /// The deleted artifact, or [`None`] when nothing was pending.
    ///
    pub async fn discard(&mut self) -> Result<Option<PathBuf>, io::Error> {
        let Some(pending) = self.slot.take() else {
            return Ok(None);
        };
        let path = pending.into_path().await;
        let file = file_name(&path);
        match remove_quietly(&path).await {
            Ok(()) => {
                info!("Discarded '{}'", path.display());
                self.converter
                    .audit()
                    .record(LogEntry::new(Action::Discard, file, Status::Deleted));
                Ok(Some(path))
            }
            Err(err) => {
                self.converter
                    .audit()
                    .record(LogEntry::new(Action::Discard, file, Status::Failure).with_message(err.to_string()));
                Err(err)
            }
        }
    }

    /// Close any open preview. The pending artifact stays where it is.
    ///
    pub async fn close(mut self) {
        self.slot.release_preview().await;
    }

    async fn delete_abandoned(&self, path: &Path) {
        let audit = self.converter.audit();
        match remove_quietly(path).await {
            Ok(()) => {
                info!("Deleted replaced artifact '{}'", path.display());
                audit.record(
                    LogEntry::new(Action::Discard, file_name(path), Status::Deleted).with_message("replaced"),
                );
            }
            Err(err) => {
                warn!("Failed to delete replaced artifact '{}': {}", path.display(), err);
                audit.record(
                    LogEntry::new(Action::Discard, file_name(path), Status::Failure).with_message(err.to_string()),
                );
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
