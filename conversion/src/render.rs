use std::borrow::Cow;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::{Captures, Regex};
use tap::Tap;

use services::{html_to_pdf, log_err, office_to_pdf, CommandError, HtmlToPdf, OfficeToPdf, HTML_PAGE_MARGIN_MM};

/// Width of the area wkhtmltopdf prints into, in CSS pixels.
pub const PRINTABLE_WIDTH_PX: u32 = mm_to_px(210 - 2 * HTML_PAGE_MARGIN_MM);
/// Height of the area wkhtmltopdf prints into, in CSS pixels.
pub const PRINTABLE_HEIGHT_PX: u32 = mm_to_px(297 - 2 * HTML_PAGE_MARGIN_MM);
/// Pictures are never shrunk below this width.
pub const MIN_PICTURE_WIDTH_PX: u32 = 96;

const fn mm_to_px(mm: u32) -> u32 {
    // 96 px per inch, rounded to the nearest pixel.
    (mm * 96 * 10 + 127) / 254
}

lazy_static! {
    static ref IMG_TAG: Regex = Regex::new(r"(?i)<img\b[^>]*>").unwrap();
    static ref WIDTH: Regex = pixel_attribute("width");
    static ref HEIGHT: Regex = pixel_attribute("height");
}

/// Matches ` name="123"`, ` name='123'` or ` name=123` inside a tag, but not `data-name=` or `max-name=`.
fn pixel_attribute(name: &str) -> Regex {
    Regex::new(&format!(
        r#"(?i)(\s){}\s*=\s*(?:"(\d+)(?:px)?"|'(\d+)(?:px)?'|(\d+)(?:px)?([\s/>]))"#,
        name
    ))
    .unwrap()
}

/// Turns a document into a PDF.
///
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render the document at `input_path` into a PDF next to it and return its path.
    ///
    /// The input is left in place.
    ///
    async fn render_to_pdf(&self, input_path: &Path) -> Result<PathBuf, anyhow::Error>;

    /// Short name used in log messages.
    ///
    fn name(&self) -> &str;
}

/// Size a picture of `width` x `height` pixels is shown at in the rendered body.
///
/// Pictures that overflow the printable area shrink to fit it. If that makes them narrower than
/// [`MIN_PICTURE_WIDTH_PX`] they keep their original size instead.
///
pub fn fit_picture(width: u32, height: u32) -> (u32, u32) {
    if width <= PRINTABLE_WIDTH_PX && height <= PRINTABLE_HEIGHT_PX {
        return (width, height);
    }
    let scale = (PRINTABLE_WIDTH_PX as f64 / width.max(1) as f64)
        .min(PRINTABLE_HEIGHT_PX as f64 / height.max(1) as f64);
    let fitted_width = ((width as f64 * scale).round() as u32).max(1);
    let fitted_height = ((height as f64 * scale).round() as u32).max(1);
    if fitted_width < MIN_PICTURE_WIDTH_PX {
        (width, height)
    } else {
        (fitted_width, fitted_height)
    }
}

/// Rewrites the `width`/`height` attributes of every sized `<img>` in `html` with [`fit_picture`].
///
/// A tag with only one of the attributes keeps its aspect ratio in the browser, so that attribute is
/// clamped to the printable area on its own. Tags without pixel sizes are left alone.
///
pub fn fit_pictures(html: &str) -> Cow<'_, str> {
    IMG_TAG.replace_all(html, |tag: &Captures| {
        let tag = &tag[0];
        match (dimension(&WIDTH, tag), dimension(&HEIGHT, tag)) {
            (Some(width), Some(height)) => {
                let (fitted_width, fitted_height) = fit_picture(width, height);
                if (fitted_width, fitted_height) == (width, height) {
                    return tag.to_string();
                }
                debug!("Fitting picture of {}x{} to {}x{}", width, height, fitted_width, fitted_height);
                let tag = set_dimension(&WIDTH, "width", tag, fitted_width);
                set_dimension(&HEIGHT, "height", &tag, fitted_height)
            }
            (Some(width), None) if width > PRINTABLE_WIDTH_PX => {
                debug!("Fitting picture of width {} to {}", width, PRINTABLE_WIDTH_PX);
                set_dimension(&WIDTH, "width", tag, PRINTABLE_WIDTH_PX)
            }
            (None, Some(height)) if height > PRINTABLE_HEIGHT_PX => {
                debug!("Fitting picture of height {} to {}", height, PRINTABLE_HEIGHT_PX);
                set_dimension(&HEIGHT, "height", tag, PRINTABLE_HEIGHT_PX)
            }
            _ => tag.to_string(),
        }
    })
}

fn dimension(attribute: &Regex, tag: &str) -> Option<u32> {
    let caps = attribute.captures(tag)?;
    caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4))?.as_str().parse().ok()
}

fn set_dimension(attribute: &Regex, name: &str, tag: &str, value: u32) -> String {
    attribute
        .replace(tag, |caps: &Captures| {
            let end = caps.get(5).map_or("", |m| m.as_str());
            format!(r#"{}{}="{}"{}"#, &caps[1], name, value, end)
        })
        .into_owned()
}

/// Renders the HTML body snapshot through wkhtmltopdf, fitting pictures to the page first.
///
#[derive(Default)]
pub struct HtmlBodyRenderer {
    service: Option<HtmlToPdf>,
}

impl HtmlBodyRenderer {
    /// A renderer using its own wkhtmltopdf service instead of the shared one.
    ///
    pub fn new(service: HtmlToPdf) -> Self {
        Self { service: Some(service) }
    }

    fn service(&self) -> &HtmlToPdf {
        self.service.as_ref().unwrap_or_else(|| html_to_pdf().as_ref())
    }

    async fn render(&self, html: &[u8], output_path: &Path) -> Result<(), anyhow::Error> {
        let mut output = tokio::fs::File::create(output_path)
            .await
            .with_context(|| format!("failed to create '{}'", output_path.display()))?;
        let result = self.service().run(html, &mut output).await;

        // wkhtmltopdf exits with 1 when some resource failed to load but the PDF was still written.
        if let Err(e) = &result {
            if let Some(e) = e.downcast_ref::<CommandError>() {
                if e.exit_code().is_some_and(|code| code == 1) {
                    debug!("Ignoring exit code 1 of {}", self.service().program());
                    return Ok(());
                }
            }
        }
        result.context("failed to render html to pdf")?;
        Ok(())
    }
}

#[async_trait]
impl DocumentRenderer for HtmlBodyRenderer {
    async fn render_to_pdf(&self, input_path: &Path) -> Result<PathBuf, anyhow::Error> {
        let output_path = input_path.with_extension("pdf");
        info!("Rendering '{}' to PDF", input_path.display());

        let html = tokio::fs::read(input_path)
            .await
            .with_context(|| format!("failed to read '{}'", input_path.display()))?;
        let html = fit_pictures(&String::from_utf8_lossy(&html)).into_owned();

        let result = self.render(html.as_bytes(), &output_path).await.and_then(|_| {
            match std::fs::metadata(&output_path) {
                Ok(meta) if meta.len() > 0 => Ok(()),
                _ => Err(anyhow!("{} produced no output", self.service().program())),
            }
        });
        if result.is_err() {
            let _ = tokio::fs::remove_file(&output_path).await;
        }
        result
            .tap(log_err!("Body rendering failed"))
            .with_context(|| format!("failed to render '{}'", input_path.display()))?;
        Ok(output_path)
    }

    fn name(&self) -> &str {
        "wkhtmltopdf"
    }
}

/// Exports word-processor documents and spreadsheets through LibreOffice.
///
#[derive(Default)]
pub struct OfficeDocumentRenderer {
    service: Option<OfficeToPdf>,
}

impl OfficeDocumentRenderer {
    /// A renderer using its own LibreOffice service instead of the shared one.
    ///
    pub fn new(service: OfficeToPdf) -> Self {
        Self { service: Some(service) }
    }
}

#[async_trait]
impl DocumentRenderer for OfficeDocumentRenderer {
    async fn render_to_pdf(&self, input_path: &Path) -> Result<PathBuf, anyhow::Error> {
        let service = self.service.as_ref().unwrap_or_else(|| office_to_pdf().as_ref());
        service.convert(input_path).await
    }

    fn name(&self) -> &str {
        "soffice"
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_printable_area() {
        assert_eq!(PRINTABLE_WIDTH_PX, 718);
        assert_eq!(PRINTABLE_HEIGHT_PX, 1047);
    }

    #[test]
    fn test_fit_picture() {
        assert_eq!(fit_picture(640, 480), (640, 480));
        assert_eq!(fit_picture(1436, 200), (718, 100));
        assert_eq!(fit_picture(500, 2094), (250, 1047));
    }

    #[test]
    fn test_fit_picture_keeps_original_when_too_narrow() {
        assert_eq!(fit_picture(200, 4000), (200, 4000));
    }

    #[test]
    fn test_fit_pictures_rewrites_sized_tags_only() {
        let html = concat!(
            r#"<p>Chart:</p><img width="1436" height="200" src="data:image/png;base64,AA==">"#,
            r#"<IMG src="logo.png">"#,
            r#"<img height='40' width='80' alt="x">"#,
        );

        let fitted = fit_pictures(html);

        assert_eq!(
            fitted,
            concat!(
                r#"<p>Chart:</p><img width="718" height="100" src="data:image/png;base64,AA==">"#,
                r#"<IMG src="logo.png">"#,
                r#"<img height='40' width='80' alt="x">"#,
            )
        );
    }

    #[test]
    fn test_fit_pictures_width_only() {
        let fitted = fit_pictures(r#"<img width="2000" src="cid:chart"><img width=300 src="small.png">"#);

        assert_eq!(fitted, r#"<img width="718" src="cid:chart"><img width=300 src="small.png">"#);
    }

    #[test]
    fn test_fit_pictures_height_only() {
        let fitted = fit_pictures(r#"<img src="tall.png" height=3000>"#);

        assert_eq!(fitted, r#"<img src="tall.png" height="1047">"#);
    }

    #[test]
    fn test_fit_pictures_ignores_prefixed_attributes() {
        let html = r#"<img data-width="10" style="max-width: 5" width="1436" data-height="7" height="200">"#;

        let fitted = fit_pictures(html);

        assert_eq!(
            fitted,
            r#"<img data-width="10" style="max-width: 5" width="718" data-height="7" height="100">"#
        );
    }

    #[tokio::test]
    async fn test_missing_renderer_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("Hello_email.html");
        std::fs::write(&input, "<p>hello</p>").unwrap();
        let renderer = HtmlBodyRenderer::new(HtmlToPdf::new("/nonexistent/wkhtmltopdf"));

        let err = renderer.render_to_pdf(&input).await.unwrap_err();

        assert!(err.to_string().starts_with("failed to render"));
        assert!(input.exists());
        assert!(!dir.path().join("Hello_email.pdf").exists());
    }

    #[tokio::test]
    async fn test_missing_office_program() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data.xlsx");
        std::fs::write(&input, b"PK").unwrap();
        let renderer = OfficeDocumentRenderer::new(OfficeToPdf::new("/nonexistent/soffice"));

        assert!(renderer.render_to_pdf(&input).await.is_err());
        assert_eq!(renderer.name(), "soffice");
    }
}
