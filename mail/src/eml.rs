use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use log::{debug, info};
use mail_parser::{MessageParser, MimeHeaders};

use crate::{snapshot, Attachment, BodyFormat, MailItem, MailSource, SaveError};

/// A [`MailSource`] whose open email is an RFC 822 file chosen with [`EmlMailSource::open`].
///
#[derive(Debug, Default)]
pub struct EmlMailSource {
    active: RwLock<Option<PathBuf>>,
}

impl EmlMailSource {
    /// Make the `.eml` file at `path` the open email.
    ///
    pub fn open(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        info!("Opened '{}'", path.display());
        *self.active.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(path);
    }

    /// Close the open email, if any.
    ///
    pub fn close(&self) {
        *self.active.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// Path of the open email.
    ///
    pub fn active_path(&self) -> Option<PathBuf> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl MailSource for EmlMailSource {
    async fn active_email(&self) -> Result<Option<Box<dyn MailItem>>, anyhow::Error> {
        let Some(path) = self.active_path() else {
            return Ok(None);
        };

        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        let message = EmlMessage::parse(content)
            .with_context(|| format!("failed to load '{}'", path.display()))?;
        Ok(Some(Box::new(message)))
    }
}

/// An email parsed from RFC 822 content.
///
#[derive(Debug, Clone)]
pub struct EmlMessage {
    raw: Vec<u8>,
    subject: Option<String>,
    attachments: Vec<Attachment>,
}

impl EmlMessage {
    /// Parse a message, extracting its subject and attachments.
    ///
    pub fn parse(raw: Vec<u8>) -> Result<Self, anyhow::Error> {
        let message = MessageParser::default()
            .parse(&raw)
            .ok_or(anyhow!("failed to parse message"))?;

        let subject = message.subject().map(str::to_string);
        let attachments = message
            .attachments
            .iter()
            .filter_map(|part_id| message.part(*part_id))
            .map(|part| Attachment::new(part.attachment_name(), part.contents()))
            .collect::<Vec<_>>();
        debug!("Parsed message {:?} with {} attachment(s)", subject, attachments.len());

        Ok(Self { raw, subject, attachments })
    }

    fn write_body(&self, format: BodyFormat) -> Result<Vec<u8>, anyhow::Error> {
        let message = MessageParser::default()
            .parse(&self.raw)
            .ok_or(anyhow!("failed to parse message"))?;

        let mut body = vec![];
        match format {
            BodyFormat::Html => snapshot::write_html(&message, &mut body)?,
        }
        Ok(body)
    }
}

#[async_trait]
impl MailItem for EmlMessage {
    fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    async fn save_body_as(&self, path: &Path, format: BodyFormat) -> Result<(), SaveError> {
        let body = self.write_body(format).map_err(SaveError::Permanent)?;
        tokio::fs::write(path, body).await.map_err(SaveError::from_io)?;
        debug!("Saved body to '{}'", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_active_email() {
        let source = EmlMailSource::default();

        assert!(source.active_email().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_email_with_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.eml");
        let raw = test_utils::eml_with_attachments(
            "Q3 Report",
            &[("data.xlsx", b"cells".as_slice()), ("notes.txt", b"remember".as_slice())],
        );
        std::fs::write(&path, raw).unwrap();
        let source = EmlMailSource::default();
        source.open(&path);

        let email = source.active_email().await.unwrap().unwrap();

        assert_eq!(email.subject(), Some("Q3 Report"));
        let names: Vec<_> = email.attachments().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec![Some("data.xlsx"), Some("notes.txt")]);
        assert_eq!(email.attachments()[1].contents, b"remember");
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let source = EmlMailSource::default();
        source.open("/nonexistent/mail.eml");

        let err = source.active_email().await.err().unwrap();

        assert_eq!(err.to_string(), "failed to read '/nonexistent/mail.eml'");
    }

    #[tokio::test]
    async fn test_close() {
        let source = EmlMailSource::default();
        source.open("/tmp/a.eml");
        source.close();

        assert_eq!(source.active_path(), None);
    }

    #[tokio::test]
    async fn test_save_body_as_html() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Q3 Report_email.html");
        let raw = test_utils::eml_with_attachments("Q3 Report", &[]);
        let message = EmlMessage::parse(raw.into_bytes()).unwrap();

        message.save_body_as(&path, BodyFormat::Html).await.unwrap();

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("<div><b>Subject</b>: Q3 Report</div>"));
    }

    #[tokio::test]
    async fn test_save_body_into_missing_directory_is_permanent() {
        let raw = test_utils::eml_with_attachments("Q3 Report", &[]);
        let message = EmlMessage::parse(raw.into_bytes()).unwrap();

        let err = message
            .save_body_as(Path::new("/nonexistent/dir/body.html"), BodyFormat::Html)
            .await
            .unwrap_err();

        assert!(!err.is_transient());
    }
}
