use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};

use mail::{BodyFormat, MailItem};
use services::config;

use crate::attachment::{numbered, usable_name, AttachmentConverter};
use crate::audit::{Action, AuditLog, LogEntry, NullAuditLog, Status};
use crate::error::ConversionError;
use crate::merge::merge_pdfs;
use crate::render::{DocumentRenderer, HtmlBodyRenderer, OfficeDocumentRenderer};
use crate::retry::RetryPolicy;
use crate::sanitize::sanitize_file_name;
use crate::workspace::{cleanup, Workspace};

/// The steps of one conversion, in the order they run.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionState {
    /// Not started.
    Idle,
    /// Deriving the file name from the subject.
    Sanitizing,
    /// Saving the body snapshot.
    SavingBody,
    /// Rendering the body snapshot to PDF.
    RenderingBody,
    /// Converting attachments to PDF.
    ConvertingAttachments,
    /// Merging everything into the artifact.
    Merging,
    /// Removing intermediate files.
    CleaningUp,
    /// The artifact is ready.
    Done,
    /// The conversion stopped without an artifact.
    Failed,
}

impl fmt::Display for ConversionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversionState::Idle => "idle",
            ConversionState::Sanitizing => "sanitizing",
            ConversionState::SavingBody => "saving body",
            ConversionState::RenderingBody => "rendering body",
            ConversionState::ConvertingAttachments => "converting attachments",
            ConversionState::Merging => "merging",
            ConversionState::CleaningUp => "cleaning up",
            ConversionState::Done => "done",
            ConversionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What happens to the email when one of its attachments fails to convert.
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttachmentFailurePolicy {
    /// Fail the whole conversion.
    #[default]
    Abort,
    /// Leave the attachment out and carry on.
    Skip,
}

impl AttachmentFailurePolicy {
    /// Reads `ATTACHMENT_FAILURE_POLICY`, defaulting to [`AttachmentFailurePolicy::Abort`].
    ///
    pub fn from_config() -> Self {
        config().get_parsed_or("ATTACHMENT_FAILURE_POLICY", AttachmentFailurePolicy::Abort)
    }
}

impl FromStr for AttachmentFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(AttachmentFailurePolicy::Abort),
            "skip" => Ok(AttachmentFailurePolicy::Skip),
            _ => Err(format!("Can not convert {} to AttachmentFailurePolicy", s)),
        }
    }
}

/// Turns one email and its attachments into a single PDF in the working directory.
///
pub struct Converter {
    workspace: Workspace,
    body_renderer: Arc<dyn DocumentRenderer>,
    document_renderer: Arc<dyn DocumentRenderer>,
    retry: RetryPolicy,
    audit: Arc<dyn AuditLog>,
    failure_policy: AttachmentFailurePolicy,
}

impl Converter {
    /// Start building a converter.
    ///
    pub fn builder() -> ConverterBuilder {
        ConverterBuilder::default()
    }

    /// The working directory artifacts are written to.
    ///
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The audit log steps are recorded in.
    ///
    pub fn audit(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    /// Convert `email` into `<subject>.pdf`: the rendered body followed by every supported attachment.
    ///
    /// # Returns
    ///
    /// * `Ok(path)` - The merged PDF inside the working directory.
    /// * `Err(_)` - The conversion stopped; [`ConversionError::state`] tells where. Intermediate files
    ///   written up to that point have been removed on a best-effort basis.
    ///
    pub async fn convert(&self, email: &dyn MailItem) -> Result<PathBuf, ConversionError> {
        self.convert_reserving(email, &[]).await
    }

    /// Like [`Converter::convert`], but never writes an intermediate file over one of `keep`.
    ///
    /// The artifact itself may still replace a kept path of the same name once the merge succeeds.
    ///
    pub async fn convert_reserving(
        &self,
        email: &dyn MailItem,
        keep: &[PathBuf],
    ) -> Result<PathBuf, ConversionError> {
        let mut progress = Progress::new();

        progress.enter(ConversionState::Sanitizing);
        let base = sanitize_file_name(email.subject().unwrap_or_default());
        if base.is_empty() {
            self.audit.record(
                LogEntry::new(Action::Convert, "", Status::Failure).with_message("subject is empty"),
            );
            return progress.fail(ConversionError::EmptySubject);
        }
        progress.file = base.clone();
        if let Err(err) = self.workspace.ensure().await {
            return progress.fail(ConversionError::Workspace {
                path: self.workspace.dir().to_path_buf(),
                source: err,
            });
        }
        self.record(Action::Convert, &base, Status::Started, None);

        let result = self.run(email, &base, keep, &mut progress).await;
        match &result {
            Ok(artifact) => {
                info!("Converted '{}' into '{}'", base, artifact.display());
                self.record(Action::Convert, &base, Status::Completed, None);
            }
            Err(err) => {
                warn!("Conversion of '{}' failed while {}: {}", base, err.state(), err);
                self.record(Action::Convert, &base, Status::Failure, Some(err.to_string()));
            }
        }
        result
    }

    async fn run(
        &self,
        email: &dyn MailItem,
        base: &str,
        keep: &[PathBuf],
        progress: &mut Progress,
    ) -> Result<PathBuf, ConversionError> {
        progress.enter(ConversionState::SavingBody);
        let snapshot = free_snapshot(self.workspace.body_snapshot(base, BodyFormat::Html), keep);
        let saved = self
            .retry
            .run("Saving email body", |attempt| {
                debug!("Saving body of '{}' to '{}' (attempt {})", base, snapshot.display(), attempt);
                email.save_body_as(&snapshot, BodyFormat::Html)
            })
            .await;
        if let Err(err) = saved {
            self.record(Action::SaveBody, base, Status::Failure, Some(err.to_string()));
            self.remove(&[snapshot.as_path()], None, base).await;
            return progress.fail(ConversionError::SaveBody(err));
        }
        self.record(Action::SaveBody, base, Status::Success, None);

        progress.enter(ConversionState::RenderingBody);
        let rendered = self.body_renderer.render_to_pdf(&snapshot).await;
        self.remove(&[snapshot.as_path()], None, base).await;
        let body_pdf = match rendered {
            Ok(path) => {
                self.record(Action::RenderBody, base, Status::Success, None);
                path
            }
            Err(err) => {
                self.record(Action::RenderBody, base, Status::Failure, Some(format!("{:#}", err)));
                self.remove(&[snapshot.with_extension("pdf").as_path()], None, base).await;
                return progress.fail(ConversionError::RenderBody(err));
            }
        };

        progress.enter(ConversionState::ConvertingAttachments);
        let artifact = self.workspace.artifact(base);
        let mut inputs = vec![body_pdf.clone()];
        let reserved = [snapshot.clone(), body_pdf.clone(), artifact.clone()]
            .into_iter()
            .chain(keep.iter().cloned());
        let mut converter = AttachmentConverter::new(&self.workspace, self.document_renderer.as_ref(), reserved);
        for attachment in email.attachments() {
            let name = attachment.name().unwrap_or_default().to_string();
            let usable = usable_name(attachment).is_some();
            match converter.convert(attachment).await {
                Ok(Some(pdf)) => {
                    self.record(Action::ConvertAttachment, base, Status::Success, Some(name));
                    inputs.push(pdf);
                }
                Ok(None) if !usable => {}
                Ok(None) => {
                    let message = format!("{}: not a supported type", name);
                    self.record(Action::ConvertAttachment, base, Status::Deleted, Some(message));
                }
                Err(err) => {
                    let message = format!("{}: {}", name, err);
                    self.record(Action::ConvertAttachment, base, Status::Failure, Some(message));
                    match self.failure_policy {
                        AttachmentFailurePolicy::Skip => {
                            warn!("Leaving attachment '{}' out of '{}': {}", name, base, err);
                        }
                        AttachmentFailurePolicy::Abort => {
                            self.remove_all(&inputs, None, base).await;
                            return progress.fail(ConversionError::Attachment { name, source: err });
                        }
                    }
                }
            }
        }

        progress.enter(ConversionState::Merging);
        match merge_pdfs(&inputs, &artifact) {
            Ok(pages) => {
                let message = format!("{} files, {} pages", inputs.len(), pages);
                self.record(Action::Merge, base, Status::Success, Some(message));
            }
            Err(err) => {
                self.record(Action::Merge, base, Status::Failure, Some(format!("{:#}", err)));
                self.remove_all(&inputs, None, base).await;
                return progress.fail(ConversionError::Merge(err));
            }
        }

        progress.enter(ConversionState::CleaningUp);
        self.remove_all(&inputs, Some(&artifact), base).await;

        progress.enter(ConversionState::Done);
        Ok(artifact)
    }

    fn record(&self, action: Action, file: &str, status: Status, message: Option<String>) {
        let entry = LogEntry::new(action, file, status);
        self.audit.record(match message {
            Some(message) => entry.with_message(message),
            None => entry,
        });
    }

    async fn remove(&self, paths: &[&Path], keep: Option<&Path>, base: &str) {
        let report = cleanup(paths.iter().copied(), keep, self.audit.as_ref(), base).await;
        for (path, err) in &report.failed {
            warn!("Failed to remove '{}': {}", path.display(), err);
        }
    }

    async fn remove_all(&self, paths: &[PathBuf], keep: Option<&Path>, base: &str) {
        let paths: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        self.remove(&paths, keep, base).await;
    }
}

/// The first of `snapshot`, `snapshot (1)`, ... that neither is a kept path nor renders onto one.
fn free_snapshot(snapshot: PathBuf, keep: &[PathBuf]) -> PathBuf {
    let clashes = |path: &Path| keep.iter().any(|kept| kept == path || *kept == path.with_extension("pdf"));
    let mut candidate = snapshot.clone();
    let mut n = 1;
    while clashes(&candidate) {
        candidate = numbered(&snapshot, n);
        n += 1;
    }
    candidate
}

/// Tracks and logs the state of one conversion.
struct Progress {
    file: String,
    state: ConversionState,
}

impl Progress {
    fn new() -> Self {
        Self { file: String::new(), state: ConversionState::Idle }
    }

    fn enter(&mut self, state: ConversionState) {
        debug!("Conversion '{}': {} -> {}", self.file, self.state, state);
        self.state = state;
    }

    fn fail<T>(&mut self, err: ConversionError) -> Result<T, ConversionError> {
        debug_assert_eq!(err.state(), self.state);
        self.enter(ConversionState::Failed);
        Err(err)
    }
}

/// Builder for [`Converter`].
///
/// Anything left unset is taken from the configuration.
///
#[derive(Default)]
pub struct ConverterBuilder {
    workspace: Option<Workspace>,
    body_renderer: Option<Arc<dyn DocumentRenderer>>,
    document_renderer: Option<Arc<dyn DocumentRenderer>>,
    retry: Option<RetryPolicy>,
    audit: Option<Arc<dyn AuditLog>>,
    failure_policy: Option<AttachmentFailurePolicy>,
}

impl ConverterBuilder {
    /// Set the working directory.
    ///
    pub fn workspace(mut self, workspace: Workspace) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Set the renderer for the body snapshot. Defaults to wkhtmltopdf.
    ///
    pub fn body_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.body_renderer = Some(renderer);
        self
    }

    /// Set the renderer for word-processor and spreadsheet attachments. Defaults to LibreOffice.
    ///
    pub fn document_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.document_renderer = Some(renderer);
        self
    }

    /// Set the retry policy for saving the body.
    ///
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the audit log. Defaults to discarding entries.
    ///
    pub fn audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Set what a failing attachment does to the conversion.
    ///
    pub fn failure_policy(mut self, policy: AttachmentFailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    /// Build the converter.
    ///
    pub fn build(self) -> Converter {
        Converter {
            workspace: self.workspace.unwrap_or_else(Workspace::from_config),
            body_renderer: self
                .body_renderer
                .unwrap_or_else(|| Arc::new(HtmlBodyRenderer::default())),
            document_renderer: self
                .document_renderer
                .unwrap_or_else(|| Arc::new(OfficeDocumentRenderer::default())),
            retry: self.retry.unwrap_or_else(RetryPolicy::from_config),
            audit: self.audit.unwrap_or_else(|| Arc::new(NullAuditLog)),
            failure_policy: self.failure_policy.unwrap_or_else(AttachmentFailurePolicy::from_config),
        }
    }
}
