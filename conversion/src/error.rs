use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::converter::ConversionState;
use crate::retry::RetryError;
use crate::router::QueueId;

/// Why an email could not be converted.
///
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The subject is missing or made only of characters a file name cannot hold.
    ///
    #[error("email has no subject usable as a file name")]
    EmptySubject,

    /// The working directory could not be created.
    ///
    #[error("failed to prepare working directory '{}': {source}", path.display())]
    Workspace {
        /// The working directory.
        path: PathBuf,
        /// The underlying failure.
        source: io::Error,
    },

    /// The body could not be saved, even after retrying.
    ///
    #[error("failed to save email body: {0}")]
    SaveBody(#[source] RetryError),

    /// The saved body could not be rendered to PDF.
    ///
    #[error("failed to render email body: {0:#}")]
    RenderBody(anyhow::Error),

    /// An attachment could not be converted.
    ///
    #[error("failed to convert attachment '{name}': {source}")]
    Attachment {
        /// The attachment file name.
        name: String,
        /// The underlying failure.
        source: AttachmentError,
    },

    /// The PDFs could not be merged.
    ///
    #[error("failed to merge PDFs: {0:#}")]
    Merge(anyhow::Error),
}

impl ConversionError {
    /// The state the conversion failed in.
    ///
    pub fn state(&self) -> ConversionState {
        match self {
            ConversionError::EmptySubject | ConversionError::Workspace { .. } => ConversionState::Sanitizing,
            ConversionError::SaveBody(_) => ConversionState::SavingBody,
            ConversionError::RenderBody(_) => ConversionState::RenderingBody,
            ConversionError::Attachment { .. } => ConversionState::ConvertingAttachments,
            ConversionError::Merge(_) => ConversionState::Merging,
        }
    }
}

/// Why a single attachment could not be converted.
///
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// The attachment could not be written to the working directory.
    ///
    #[error("failed to write attachment: {0}")]
    Materialize(#[source] io::Error),

    /// The document renderer failed.
    ///
    #[error("{renderer} failed: {error:#}")]
    Render {
        /// Name of the renderer.
        renderer: String,
        /// The renderer's failure.
        error: anyhow::Error,
    },

    /// The image could not be decoded or written as PDF.
    ///
    #[error("{0:#}")]
    Image(anyhow::Error),
}

/// Why the pending artifact could not be routed.
///
#[derive(Debug, Error)]
pub enum RouteError {
    /// There is no pending artifact.
    ///
    #[error("nothing to route")]
    NothingPending,

    /// No queue is configured under this identifier.
    ///
    #[error("unknown queue {0}")]
    UnknownQueue(QueueId),

    /// A file of the same name already exists in the queue. Neither file was touched.
    ///
    #[error("'{}' already exists", path.display())]
    Collision {
        /// The existing file.
        path: PathBuf,
    },

    /// Moving the artifact failed. It is still pending.
    ///
    #[error("failed to move '{}' to '{}': {source}", from.display(), to.display())]
    Io {
        /// The pending artifact.
        from: PathBuf,
        /// The intended destination.
        to: PathBuf,
        /// The underlying failure.
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_error_states() {
        assert_eq!(ConversionError::EmptySubject.state(), ConversionState::Sanitizing);
        assert_eq!(
            ConversionError::RenderBody(anyhow!("boom")).state(),
            ConversionState::RenderingBody
        );
        assert_eq!(ConversionError::Merge(anyhow!("boom")).state(), ConversionState::Merging);
    }

    #[test]
    fn test_messages() {
        let err = ConversionError::Attachment {
            name: "data.xlsx".to_string(),
            source: AttachmentError::Render {
                renderer: "soffice".to_string(),
                error: anyhow!("no such file").context("failed to export"),
            },
        };

        assert_eq!(
            err.to_string(),
            "failed to convert attachment 'data.xlsx': soffice failed: failed to export: no such file"
        );
        assert_eq!(
            RouteError::Collision { path: PathBuf::from("/queues/2/Q3 Report.pdf") }.to_string(),
            "'/queues/2/Q3 Report.pdf' already exists"
        );
    }
}
