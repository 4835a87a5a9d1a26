use std::path::Path;
use std::process::Stdio;

use anyhow::Context;
use log::{debug, info};

use crate::config;

/// Opens PDFs in an external viewer program.
///
/// The program is taken from the `PDF_VIEWER` configuration key. Without one, opening a PDF only logs
/// its location.
///
#[derive(Debug, Clone)]
pub struct PdfViewer {
    program: Option<String>,
}

impl Default for PdfViewer {
    fn default() -> Self {
        Self::new(config().get("PDF_VIEWER"))
    }
}

impl PdfViewer {
    /// Create a viewer backed by `program`, or a headless one for [`None`].
    ///
    pub fn new(program: Option<String>) -> Self {
        Self { program }
    }

    /// Show the PDF at `path`.
    ///
    /// The returned [`ViewerProcess`] keeps the viewer alive until it is closed or dropped.
    ///
    pub fn open(&self, path: impl AsRef<Path>) -> Result<ViewerProcess, anyhow::Error> {
        let path = path.as_ref();
        let Some(program) = &self.program else {
            info!("Preview ready at '{}'", path.display());
            return Ok(ViewerProcess { child: None });
        };

        let child = tokio::process::Command::new(program)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start viewer '{}'", program))?;
        debug!("Started viewer '{}' (pid {:?})", program, child.id());

        Ok(ViewerProcess { child: Some(child) })
    }
}

/// A running viewer showing one PDF.
///
#[derive(Debug)]
pub struct ViewerProcess {
    child: Option<tokio::process::Child>,
}

impl ViewerProcess {
    /// Whether a viewer process was actually started.
    ///
    pub fn is_attached(&self) -> bool {
        self.child.is_some()
    }

    /// Stop the viewer and wait until it has exited, so it no longer holds the file open.
    ///
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        if let Some(mut child) = self.child.take() {
            if child.try_wait()?.is_none() {
                child.kill().await.context("failed to stop viewer")?;
            }
            debug!("Viewer stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_headless_viewer() {
        let viewer = PdfViewer::new(None);

        let process = viewer.open("/tmp/Q3 Report.pdf").unwrap();

        assert!(!process.is_attached());
        process.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_stops_running_viewer() {
        // `sleep` treats the path as a duration and runs until killed
        let viewer = PdfViewer::new(Some("sleep".to_string()));

        let process = viewer.open("30").unwrap();

        assert!(process.is_attached());
        process.close().await.unwrap();
    }

    #[test]
    fn test_missing_viewer_program() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let _guard = runtime.enter();
        let viewer = PdfViewer::new(Some("viewer-that-is-not-installed".to_string()));

        let err = viewer.open("/tmp/a.pdf").unwrap_err();

        assert_eq!(err.to_string(), "failed to start viewer 'viewer-that-is-not-installed'");
    }
}
