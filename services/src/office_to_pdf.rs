use std::ffi::OsString;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use lazy_static::lazy_static;
use log::{debug, info};

use crate::{config, stream_command, trim_to_string};

const DEFAULT_PROGRAM: &str = "soffice";

/// The type of the singleton instance of the `OfficeToPdf` service.
///
pub type OfficeToPdfService = Box<OfficeToPdf>;

lazy_static! {
    static ref OFFICE_TO_PDF: OfficeToPdfService = Box::<OfficeToPdf>::default();
}

/// Returns the singleton instance of the `OfficeToPdf` service.
///
pub fn office_to_pdf() -> &'static OfficeToPdfService {
    &OFFICE_TO_PDF
}

/// Exports word-processor documents and spreadsheets to PDF through a headless LibreOffice.
///
/// The program is taken from the `SOFFICE` configuration key.
///
pub struct OfficeToPdf {
    program: String,
}

impl Default for OfficeToPdf {
    fn default() -> Self {
        Self::new(config().get_or("SOFFICE", DEFAULT_PROGRAM))
    }
}

impl OfficeToPdf {
    /// Create a service running the given LibreOffice executable.
    ///
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    /// Convert a document into a PDF placed next to it.
    ///
    /// The output path is the input path with its extension replaced by `pdf`.
    ///
    /// # Arguments
    ///
    /// * `input_path` - The document to convert.
    ///
    /// # Returns
    ///
    /// The path of the written PDF.
    ///
    pub async fn convert(&self, input_path: impl AsRef<Path>) -> Result<PathBuf, anyhow::Error> {
        let input_path = input_path.as_ref();
        let output_path = input_path.with_extension("pdf");
        let arguments = Self::arguments(input_path)?;
        info!("Exporting '{}' to PDF", input_path.display());
        debug!("Running {} {:?}", self.program, arguments);

        let mut error = vec![];
        stream_command(
            &self.program,
            &arguments,
            Option::<Cursor<Vec<u8>>>::None,
            Option::<Vec<u8>>::None,
            Some(&mut error),
        )
        .await
        .map_err(|err| anyhow!("{}", err))
        .with_context(|| format!("'{}' failed to export: {}", self.program, trim_to_string(&error)))?;

        if !tokio::fs::try_exists(&output_path).await? {
            return Err(anyhow!(
                "'{}' exited without writing '{}'",
                self.program,
                output_path.display()
            ));
        }
        Ok(output_path)
    }

    fn arguments(input_path: &Path) -> Result<Vec<OsString>, anyhow::Error> {
        let out_dir = input_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        if input_path.file_name().is_none() {
            return Err(anyhow!("'{}' does not name a file", input_path.display()));
        }

        Ok(vec![
            "--headless".into(),
            "--norestore".into(),
            "--convert-to".into(),
            "pdf".into(),
            "--outdir".into(),
            out_dir.as_os_str().to_owned(),
            input_path.as_os_str().to_owned(),
        ])
    }
}
