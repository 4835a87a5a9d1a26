use std::path::{Path, PathBuf};

use anyhow::Context;
use image::{ColorType, DynamicImage, ImageFormat};
use log::{debug, info};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// A4 width in points.
pub const PAGE_WIDTH: f32 = 595.0;
/// A4 height in points.
pub const PAGE_HEIGHT: f32 = 842.0;
/// Margin on every side, in points.
pub const PAGE_MARGIN: f32 = 36.0;

/// Where an image lands on the page, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Left edge.
    pub x: f32,
    /// Bottom edge.
    pub y: f32,
    #[allow(missing_docs)]
    pub width: f32,
    #[allow(missing_docs)]
    pub height: f32,
}

/// Places a `width` x `height` pixel image centered on an A4 page at one point per pixel.
///
/// An image larger than the printable area is shrunk to fit it, preserving its aspect ratio. Smaller
/// images keep their size.
///
pub fn placement(width: u32, height: u32) -> Placement {
    let max_width = PAGE_WIDTH - 2.0 * PAGE_MARGIN;
    let max_height = PAGE_HEIGHT - 2.0 * PAGE_MARGIN;
    let (width, height) = (width.max(1) as f32, height.max(1) as f32);

    let scale = (max_width / width).min(max_height / height).min(1.0);
    let (width, height) = (width * scale, height * scale);
    Placement {
        x: (PAGE_WIDTH - width) / 2.0,
        y: (PAGE_HEIGHT - height) / 2.0,
        width,
        height,
    }
}

/// Converts a raster image into a single-page PDF next to it and deletes the image.
///
/// # Returns
///
/// The path of the PDF, which is the image path with a `pdf` extension.
///
pub async fn image_to_pdf(image_path: &Path) -> Result<PathBuf, anyhow::Error> {
    let pdf_path = image_path.with_extension("pdf");
    info!("Converting image '{}' to PDF", image_path.display());

    let bytes = tokio::fs::read(image_path)
        .await
        .with_context(|| format!("failed to read image '{}'", image_path.display()))?;
    let mut doc = image_document(&bytes)
        .with_context(|| format!("failed to convert image '{}'", image_path.display()))?;
    doc.save(&pdf_path)
        .with_context(|| format!("failed to write '{}'", pdf_path.display()))?;

    tokio::fs::remove_file(image_path)
        .await
        .with_context(|| format!("failed to remove image '{}'", image_path.display()))?;
    Ok(pdf_path)
}

/// Builds the one-page document showing the encoded image `bytes`.
///
pub(crate) fn image_document(bytes: &[u8]) -> Result<Document, anyhow::Error> {
    let format = image::guess_format(bytes).context("unrecognized image format")?;
    let img = image::load_from_memory_with_format(bytes, format).context("failed to decode image")?;
    let (width, height) = (img.width(), img.height());
    debug!("Decoded {:?} image of {}x{} ({:?})", format, width, height, img.color());

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(image_stream(bytes, format, &img));

    let place = placement(width, height);
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(place.width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(place.height),
                    Object::Real(place.x),
                    Object::Real(place.y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(PAGE_WIDTH),
            Object::Real(PAGE_HEIGHT),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => Object::Integer(1),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    Ok(doc)
}

/// JPEGs in gray or RGB are embedded as-is; everything else is re-encoded as 8-bit RGB.
///
fn image_stream(bytes: &[u8], format: ImageFormat, img: &DynamicImage) -> Stream {
    let passthrough_space = match (format, img.color()) {
        (ImageFormat::Jpeg, ColorType::L8) => Some("DeviceGray"),
        (ImageFormat::Jpeg, ColorType::Rgb8) => Some("DeviceRGB"),
        _ => None,
    };

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => Object::Integer(img.width() as i64),
        "Height" => Object::Integer(img.height() as i64),
        "BitsPerComponent" => Object::Integer(8),
    };
    match passthrough_space {
        Some(space) => {
            dict.set("ColorSpace", space);
            dict.set("Filter", "DCTDecode");
            Stream::new(dict, bytes.to_vec()).with_compression(false)
        }
        None => {
            dict.set("ColorSpace", "DeviceRGB");
            Stream::new(dict, img.to_rgb8().into_raw())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_image_not_upscaled() {
        let place = placement(100, 50);

        assert_eq!((place.width, place.height), (100.0, 50.0));
        assert_eq!((place.x, place.y), (247.5, 396.0));
    }

    #[test]
    fn test_wide_image_shrunk_to_printable_width() {
        let place = placement(1046, 200);

        assert_eq!(place.width, 523.0);
        assert_eq!(place.height, 100.0);
        assert_eq!(place.x, PAGE_MARGIN);
    }

    #[test]
    fn test_tall_image_shrunk_to_printable_height() {
        let place = placement(385, 1540);

        assert_eq!(place.height, 770.0);
        assert_eq!(place.width, 192.5);
        assert_eq!(place.y, PAGE_MARGIN);
    }

    #[tokio::test]
    async fn test_png_to_pdf_replaces_image() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("scan.png");
        std::fs::write(&png, test_utils::png_bytes(64, 32)).unwrap();

        let pdf = image_to_pdf(&png).await.unwrap();

        assert_eq!(pdf, dir.path().join("scan.pdf"));
        assert_eq!(test_utils::pdf_page_count(&pdf), 1);
        assert!(!png.exists());
    }

    #[tokio::test]
    async fn test_jpeg_embedded_without_reencoding() {
        let jpeg = test_utils::jpeg_bytes(20, 10);

        let doc = image_document(&jpeg).unwrap();

        let embedded = doc
            .objects
            .values()
            .filter_map(|object| object.as_stream().ok())
            .find(|stream| stream.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(&b"Image"[..]))
            .unwrap();
        assert_eq!(embedded.content, jpeg);
    }

    #[tokio::test]
    async fn test_undecodable_image_is_error_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.jpg");
        std::fs::write(&broken, b"definitely not a jpeg").unwrap();

        let err = image_to_pdf(&broken).await.unwrap_err();

        assert!(err.to_string().starts_with("failed to convert image"));
        assert!(!dir.path().join("broken.pdf").exists());
    }
}
