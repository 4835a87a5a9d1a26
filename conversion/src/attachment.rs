use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use mail::Attachment;

use crate::error::AttachmentError;
use crate::image_pdf::image_to_pdf;
use crate::render::DocumentRenderer;
use crate::sanitize::sanitize_file_name;
use crate::workspace::{remove_quietly, Workspace};

/// How an attachment is turned into PDF pages.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    /// Already a PDF, merged as-is.
    PassThroughPdf,
    /// Exported through the document renderer.
    WordDocument,
    /// Exported through the document renderer.
    Spreadsheet,
    /// Embedded on a page of its own.
    RasterImage,
    /// Dropped.
    Unsupported,
}

/// Checked in order, first match wins. Matching is case-sensitive.
const SUFFIXES: [(&str, AttachmentKind); 8] = [
    (".doc", AttachmentKind::WordDocument),
    (".docx", AttachmentKind::WordDocument),
    (".xls", AttachmentKind::Spreadsheet),
    (".xlsx", AttachmentKind::Spreadsheet),
    (".pdf", AttachmentKind::PassThroughPdf),
    (".jpg", AttachmentKind::RasterImage),
    (".jpeg", AttachmentKind::RasterImage),
    (".png", AttachmentKind::RasterImage),
];

impl AttachmentKind {
    /// Classify an attachment by the suffix of its file name.
    ///
    pub fn classify(file_name: &str) -> Self {
        SUFFIXES
            .iter()
            .find(|(suffix, _)| file_name.ends_with(suffix))
            .map(|(_, kind)| *kind)
            .unwrap_or(AttachmentKind::Unsupported)
    }

    fn produces_sibling(&self) -> bool {
        matches!(
            self,
            AttachmentKind::WordDocument | AttachmentKind::Spreadsheet | AttachmentKind::RasterImage
        )
    }
}

/// Converts the attachments of one email, keeping track of the file names already in use.
///
pub struct AttachmentConverter<'a> {
    workspace: &'a Workspace,
    renderer: &'a dyn DocumentRenderer,
    taken: HashSet<PathBuf>,
}

impl<'a> AttachmentConverter<'a> {
    /// A converter writing into `workspace`, where `reserved` paths are already used by the conversion.
    ///
    pub fn new(
        workspace: &'a Workspace,
        renderer: &'a dyn DocumentRenderer,
        reserved: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        Self {
            workspace,
            renderer,
            taken: reserved.into_iter().collect(),
        }
    }

    /// Materialize one attachment and convert it to a PDF.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(path))` - The PDF to merge for this attachment.
    /// * `Ok(None)` - The attachment has no usable name or an unsupported type and contributes nothing.
    /// * `Err(_)` - Conversion failed. Files written for the attachment have been removed.
    ///
    pub async fn convert(&mut self, attachment: &Attachment) -> Result<Option<PathBuf>, AttachmentError> {
        let Some(name) = usable_name(attachment) else {
            debug!("Skipping attachment without a usable file name");
            return Ok(None);
        };

        let kind = AttachmentKind::classify(&name);
        let path = self.claim(&name, kind);
        debug!("Materializing attachment as '{}' ({:?})", path.display(), kind);
        if let Err(err) = attachment.save_as_file(&path).await {
            discard(&path).await;
            return Err(AttachmentError::Materialize(err));
        }

        match kind {
            AttachmentKind::Unsupported => {
                info!("Dropping unsupported attachment '{}'", name);
                discard(&path).await;
                Ok(None)
            }
            AttachmentKind::PassThroughPdf => Ok(Some(path)),
            AttachmentKind::WordDocument | AttachmentKind::Spreadsheet => {
                match self.renderer.render_to_pdf(&path).await {
                    Ok(pdf) => {
                        discard(&path).await;
                        Ok(Some(pdf))
                    }
                    Err(err) => {
                        discard(&path).await;
                        discard(&path.with_extension("pdf")).await;
                        Err(AttachmentError::Render {
                            renderer: self.renderer.name().to_string(),
                            error: err,
                        })
                    }
                }
            }
            AttachmentKind::RasterImage => match image_to_pdf(&path).await {
                Ok(pdf) => Ok(Some(pdf)),
                Err(err) => {
                    discard(&path).await;
                    discard(&path.with_extension("pdf")).await;
                    Err(AttachmentError::Image(err))
                }
            },
        }
    }

    /// Picks a path for `name` that collides with nothing else this conversion writes.
    ///
    fn claim(&mut self, name: &str, kind: AttachmentKind) -> PathBuf {
        let original = self.workspace.attachment(name);
        let mut candidate = original.clone();
        let mut n = 1;
        while !self.is_free(&candidate, kind) {
            candidate = numbered(&original, n);
            n += 1;
        }
        if kind.produces_sibling() {
            self.taken.insert(candidate.with_extension("pdf"));
        }
        self.taken.insert(candidate.clone());
        candidate
    }

    fn is_free(&self, candidate: &Path, kind: AttachmentKind) -> bool {
        !self.taken.contains(candidate)
            && !(kind.produces_sibling() && self.taken.contains(&candidate.with_extension("pdf")))
    }
}

/// The sanitized file name of `attachment`, or [`None`] when nothing usable is left of it.
///
pub fn usable_name(attachment: &Attachment) -> Option<String> {
    attachment
        .name()
        .map(sanitize_file_name)
        .filter(|name| !matches!(name.as_str(), "" | "." | ".."))
}

/// `dir/stem (n).ext`
pub(crate) fn numbered(path: &Path, n: u32) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

async fn discard(path: &Path) {
    if let Err(err) = remove_quietly(path).await {
        warn!("Failed to remove '{}': {}", path.display(), err);
    }
}
