use std::process::ExitStatus;

use lazy_static::lazy_static;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{config, stream_command, trim_to_string};

const DEFAULT_PROGRAM: &str = "wkhtmltopdf";

/// Page margin on every side, in millimetres.
///
/// Callers fitting content to the printable area depend on this value together with the A4 page size.
///
pub const HTML_PAGE_MARGIN_MM: u32 = 10;

const DEFAULT_ARGS: [&str; 23] = [
    "--quiet",
    "--encoding",
    "utf-8",
    "--page-size",
    "A4",
    "--margin-top",
    "10mm",
    "--margin-bottom",
    "10mm",
    "--margin-left",
    "10mm",
    "--margin-right",
    "10mm",
    "--disable-external-links",
    "--disable-internal-links",
    "--disable-forms",
    "--disable-local-file-access",
    "--disable-javascript",
    "--disable-plugins",
    "--proxy",
    "bogusproxy",
    "-",
    "-",
];

/// The type of the singleton instance of the `HtmlToPdf` service.
///
pub type HtmlToPdfService = Box<HtmlToPdf>;

lazy_static! {
    static ref HTML_TO_PDF: HtmlToPdfService = Box::<HtmlToPdf>::default();
}

/// Returns the singleton instance of the `HtmlToPdf` service.
///
pub fn html_to_pdf() -> &'static HtmlToPdfService {
    &HTML_TO_PDF
}

/// The output of the `HtmlToPdf` service.
///
#[derive(Debug)]
pub struct HtmlToPdfOutput {
    /// The exit status of the call to wkhtmltopdf.
    ///
    pub exit_status: ExitStatus,

    /// The stderr of the call to wkhtmltopdf.
    ///
    pub error: String,
}

/// Renders HTML documents into PDFs through wkhtmltopdf.
///
/// The program is taken from the `WKHTMLTOPDF` configuration key.
///
pub struct HtmlToPdf {
    program: String,
}

impl Default for HtmlToPdf {
    fn default() -> Self {
        Self::new(config().get_or("WKHTMLTOPDF", DEFAULT_PROGRAM))
    }
}

impl HtmlToPdf {
    /// Create a service running the given wkhtmltopdf executable.
    ///
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    /// The executable this service runs.
    ///
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Render HTML into a PDF.
    ///
    /// # Arguments
    ///
    /// * `input` - HTML content streamed into stdin of wkhtmltopdf.
    /// * `output` - Receives the PDF written to stdout of wkhtmltopdf.
    ///
    /// # Returns
    ///
    /// * `Ok(HtmlToPdfOutput)` - If wkhtmltopdf exited successfully.
    /// * `Err(_)` - A [`crate::CommandError`] if it could not run or exited unsuccessfully.
    ///
    pub async fn run<R, W>(&self, mut input: R, mut output: W) -> Result<HtmlToPdfOutput, anyhow::Error>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        debug!("Running {} {:?}", self.program, DEFAULT_ARGS);

        let mut error = vec![];
        let exit_status = stream_command(
            &self.program,
            &DEFAULT_ARGS,
            Some(&mut input),
            Some(&mut output),
            Some(&mut error),
        ).await?;

        Ok(HtmlToPdfOutput {
            exit_status,
            error: trim_to_string(&error),
        })
    }
}
