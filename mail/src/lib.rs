//!
//! Access to the email being converted.
//!
//! The conversion core only sees the [`MailSource`] and [`MailItem`] traits. The [`eml`] module
//! implements them on top of RFC 822 files, rendering the body into an HTML snapshot.
//!
#![warn(missing_docs)]

use std::io;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use eml::*;

/// Mail source backed by `.eml` files.
///
pub mod eml;

pub(crate) mod snapshot;

/// File format a body can be saved in.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BodyFormat {
    /// A standalone HTML document with the headers, the body and its inline pictures embedded.
    ///
    Html,
}

impl BodyFormat {
    /// The file extension used for snapshots in this format.
    ///
    pub fn extension(&self) -> &'static str {
        match self {
            BodyFormat::Html => "html",
        }
    }
}

/// Failure to save an email body.
///
#[derive(Debug, Error)]
pub enum SaveError {
    /// The store was busy or unavailable. Trying again later may succeed.
    ///
    #[error("mail store temporarily unavailable: {0:#}")]
    Transient(anyhow::Error),

    /// Retrying will not help.
    ///
    #[error("failed to save body: {0:#}")]
    Permanent(anyhow::Error),
}

impl SaveError {
    /// Classifies an I/O error as transient or permanent.
    ///
    pub fn from_io(err: io::Error) -> Self {
        if is_transient(&err) {
            Self::Transient(err.into())
        } else {
            Self::Permanent(err.into())
        }
    }

    /// Whether the failure is worth retrying.
    ///
    pub fn is_transient(&self) -> bool {
        matches!(self, SaveError::Transient(_))
    }
}

/// Whether an I/O error means "busy or unavailable right now" rather than a lasting failure.
///
pub fn is_transient(err: &io::Error) -> bool {
    use io::ErrorKind::*;

    if matches!(err.kind(), WouldBlock | Interrupted | TimedOut | ResourceBusy) {
        return true;
    }
    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

/// A file attached to an email.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The file name the sender gave the attachment, if any.
    ///
    pub file_name: Option<String>,

    /// Raw content of the attachment.
    ///
    pub contents: Vec<u8>,
}

impl Attachment {
    /// Create an attachment.
    ///
    pub fn new(file_name: Option<impl Into<String>>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.map(Into::into),
            contents: contents.into(),
        }
    }

    /// The file name, treating an empty one as missing.
    ///
    pub fn name(&self) -> Option<&str> {
        self.file_name.as_deref().filter(|name| !name.is_empty())
    }

    /// Write the contents to `path`, replacing any existing file.
    ///
    pub async fn save_as_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        tokio::fs::write(path, &self.contents).await
    }
}

/// An email that can be converted.
///
#[async_trait]
pub trait MailItem: Send + Sync {
    /// The subject line, if the email has one.
    ///
    fn subject(&self) -> Option<&str>;

    /// Attachments in the order the email lists them.
    ///
    fn attachments(&self) -> &[Attachment];

    /// Save the body of the email to `path` in the given format.
    ///
    /// On failure the file at `path` may be missing or partially written.
    ///
    async fn save_body_as(&self, path: &Path, format: BodyFormat) -> Result<(), SaveError>;
}

/// Provides the email the operator currently has open.
///
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Returns the open email, or [`None`] when nothing is open.
    ///
    async fn active_email(&self) -> Result<Option<Box<dyn MailItem>>, anyhow::Error>;
}
