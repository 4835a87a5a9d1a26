//!
//! # Test Utilities
//!
//! Fixture builders for PDFs, images and emails, so tests never depend on files checked into the repo.
//!
#![warn(missing_docs)]

use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tempfile::{NamedTempFile, TempPath};

/// Reads the contents of a file into a `Vec<u8>`.
///
/// # Returns
///
/// Some contents of the file, or None if the file could not be read.
///
pub fn read_contents(path: impl AsRef<Path>) -> Option<Vec<u8>> {
    std::fs::read(path).ok()
}

/// Creates a temporary file and returns its path.
///
#[inline]
pub fn temp_path() -> std::io::Result<TempPath> {
    Ok(NamedTempFile::new()?.into_temp_path())
}

/// Writes a PDF with `pages` A4 pages to `path`.
///
/// Page N shows the text `"<label> <N>"`, which [`pdf_page_labels`] reads back. Page size and resources
/// are inherited from the page tree rather than set on the pages.
///
pub fn write_pdf(path: impl AsRef<Path>, label: &str, pages: usize) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = vec![];
    for number in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), Object::Integer(24)]),
                Operation::new("Td", vec![Object::Integer(72), Object::Integer(720)]),
                Operation::new("Tj", vec![Object::string_literal(format!("{} {}", label, number))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encodable content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(pages as i64),
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path.as_ref()).expect("writable pdf");
}

/// Number of pages of the PDF at `path`.
///
pub fn pdf_page_count(path: impl AsRef<Path>) -> usize {
    Document::load(path.as_ref()).expect("readable pdf").get_pages().len()
}

/// The text drawn on each page of the PDF at `path`, in page order.
///
/// Pages without text yield an empty string.
///
pub fn pdf_page_labels(path: impl AsRef<Path>) -> Vec<String> {
    let doc = Document::load(path.as_ref()).expect("readable pdf");
    doc.get_pages()
        .values()
        .map(|page_id| {
            let data = doc.get_page_content(*page_id).unwrap_or_default();
            let content = Content::decode(&data).unwrap_or(Content { operations: vec![] });
            content
                .operations
                .iter()
                .filter(|op| op.operator == "Tj")
                .filter_map(|op| match op.operands.first() {
                    Some(Object::String(text, _)) => Some(String::from_utf8_lossy(text).to_string()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Encodes a solid `width` x `height` PNG.
///
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut bytes = Cursor::new(vec![]);
    img.write_to(&mut bytes, image::ImageFormat::Png).expect("encodable png");
    bytes.into_inner()
}

/// Encodes a solid `width` x `height` JPEG.
///
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 40, 200]));
    let mut bytes = Cursor::new(vec![]);
    img.write_to(&mut bytes, image::ImageFormat::Jpeg).expect("encodable jpeg");
    bytes.into_inner()
}

/// Builds a multipart RFC 822 message with a plain text body and the given attachments.
///
pub fn eml_with_attachments(subject: &str, attachments: &[(&str, &[u8])]) -> String {
    let mut raw = format!(
        "\
From: Dana Reyes <dana@example.com>\r
To: ops@example.com\r
Subject: {}\r
Date: Tue, 1 Oct 2024 09:30:00 -0700\r
MIME-Version: 1.0\r
Content-Type: multipart/mixed; boundary=\"fixture-boundary\"\r
\r
--fixture-boundary\r
Content-Type: text/plain; charset=us-ascii\r
\r
Please file the attached.\r
",
        subject
    );
    for (name, contents) in attachments {
        raw.push_str(&format!(
            "\
--fixture-boundary\r
Content-Type: application/octet-stream; name=\"{name}\"\r
Content-Disposition: attachment; filename=\"{name}\"\r
Content-Transfer-Encoding: base64\r
\r
{}\r
",
            STANDARD.encode(contents)
        ));
    }
    raw.push_str("--fixture-boundary--\r\n");
    raw
}

/// Builds an HTML RFC 822 message showing one inline PNG referenced as `cid:<content_id>`.
///
pub fn eml_with_inline_image(subject: &str, content_id: &str, png: &[u8]) -> String {
    format!(
        "\
From: Dana Reyes <dana@example.com>\r
To: ops@example.com\r
Subject: {subject}\r
MIME-Version: 1.0\r
Content-Type: multipart/related; boundary=\"related-boundary\"\r
\r
--related-boundary\r
Content-Type: text/html; charset=us-ascii\r
\r
<p>Chart below</p><img src=\"cid:{content_id}\">\r
--related-boundary\r
Content-Type: image/png\r
Content-ID: <{content_id}>\r
Content-Disposition: inline\r
Content-Transfer-Encoding: base64\r
\r
{}\r
--related-boundary--\r
",
        STANDARD.encode(png)
    )
}
