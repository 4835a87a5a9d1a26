use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};

use services::{PdfViewer, ViewerProcess};

/// Shows a PDF to the operator.
///
#[async_trait]
pub trait Previewer: Send + Sync {
    /// Open a preview of the PDF at `path`.
    ///
    async fn open(&self, path: &Path) -> Result<Box<dyn PreviewLease>, anyhow::Error>;
}

/// An open preview. The file may be held open until the lease is released.
///
#[async_trait]
pub trait PreviewLease: Send {
    /// Close the preview.
    ///
    async fn release(self: Box<Self>) -> Result<(), anyhow::Error>;
}

#[async_trait]
impl Previewer for PdfViewer {
    async fn open(&self, path: &Path) -> Result<Box<dyn PreviewLease>, anyhow::Error> {
        let process = PdfViewer::open(self, path)?;
        Ok(Box::new(process))
    }
}

#[async_trait]
impl PreviewLease for ViewerProcess {
    async fn release(self: Box<Self>) -> Result<(), anyhow::Error> {
        self.close().await
    }
}

/// The artifact awaiting a routing decision, together with its preview.
///
pub struct Pending {
    path: PathBuf,
    lease: Option<Box<dyn PreviewLease>>,
}

impl Pending {
    /// The artifact.
    ///
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a preview is open.
    ///
    pub fn is_previewed(&self) -> bool {
        self.lease.is_some()
    }

    /// Close the preview, if any. A failure to close is logged and otherwise ignored.
    ///
    pub async fn release_preview(&mut self) {
        if let Some(lease) = self.lease.take() {
            debug!("Releasing preview of '{}'", self.path.display());
            if let Err(err) = lease.release().await {
                warn!("Failed to close preview of '{}': {:#}", self.path.display(), err);
            }
        }
    }

    /// Close the preview and give up the artifact path.
    ///
    pub async fn into_path(mut self) -> PathBuf {
        self.release_preview().await;
        self.path
    }
}

/// Holds at most one pending artifact.
///
#[derive(Default)]
pub struct PendingSlot {
    current: Option<Pending>,
}

impl PendingSlot {
    /// The pending artifact, if any.
    ///
    pub fn get(&self) -> Option<&Path> {
        self.current.as_ref().map(Pending::path)
    }

    /// Whether nothing is pending.
    ///
    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Whether the pending artifact is being previewed.
    ///
    pub fn is_previewed(&self) -> bool {
        self.current.as_ref().is_some_and(Pending::is_previewed)
    }

    /// Make `path` the pending artifact, without a preview.
    ///
    /// # Returns
    ///
    /// The artifact that was pending before, with its preview still open.
    ///
    pub fn replace(&mut self, path: impl Into<PathBuf>) -> Option<Pending> {
        self.current.replace(Pending { path: path.into(), lease: None })
    }

    /// Empty the slot.
    ///
    pub fn take(&mut self) -> Option<Pending> {
        self.current.take()
    }

    /// Attach a preview to the pending artifact.
    ///
    /// Without a pending artifact the lease is handed back.
    ///
    pub fn set_lease(&mut self, lease: Box<dyn PreviewLease>) -> Result<(), Box<dyn PreviewLease>> {
        match &mut self.current {
            Some(pending) => {
                pending.lease = Some(lease);
                Ok(())
            }
            None => Err(lease),
        }
    }

    /// Close the preview of the pending artifact, if one is open.
    ///
    pub async fn release_preview(&mut self) {
        if let Some(pending) = &mut self.current {
            pending.release_preview().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct CountingLease(Arc<AtomicUsize>);

    #[async_trait]
    impl PreviewLease for CountingLease {
        async fn release(self: Box<Self>) -> Result<(), anyhow::Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_replace_returns_previous() {
        let mut slot = PendingSlot::default();

        assert!(slot.replace("/work/A.pdf").is_none());
        let previous = slot.replace("/work/B.pdf").unwrap();

        assert_eq!(previous.path(), Path::new("/work/A.pdf"));
        assert_eq!(slot.get(), Some(Path::new("/work/B.pdf")));
    }

    #[tokio::test]
    async fn test_release_preview_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut slot = PendingSlot::default();
        slot.replace("/work/A.pdf");
        assert!(slot.set_lease(Box::new(CountingLease(released.clone()))).is_ok());
        assert!(slot.is_previewed());

        slot.release_preview().await;
        slot.release_preview().await;

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!slot.is_previewed());
        assert!(!slot.is_empty());
    }

    #[tokio::test]
    async fn test_lease_without_pending_is_returned() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut slot = PendingSlot::default();

        let lease = slot.set_lease(Box::new(CountingLease(released.clone()))).unwrap_err();
        lease.release().await.unwrap();

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_take_then_into_path_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut slot = PendingSlot::default();
        slot.replace("/work/A.pdf");
        let _ = slot.set_lease(Box::new(CountingLease(released.clone())));

        let path = slot.take().unwrap().into_path().await;

        assert_eq!(path, PathBuf::from("/work/A.pdf"));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(slot.is_empty());
    }

    #[tokio::test]
    async fn test_headless_viewer_lease() {
        let viewer = PdfViewer::new(None);

        let lease = Previewer::open(&viewer, Path::new("/work/A.pdf")).await.unwrap();

        lease.release().await.unwrap();
    }
}
