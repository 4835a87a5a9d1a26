use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lazy_static::lazy_static;
use log::debug;
use mail_parser::{Message, MimeHeaders};
use regex::{Captures, NoExpand, Regex};

lazy_static! {
    static ref IMG_TAG: Regex = Regex::new(r#"(?i)<img\b[^>]*>"#).expect("valid img regex");
    static ref CID_SRC: Regex =
        Regex::new(r#"(?i)\ssrc\s*=\s*["']cid:([^"']+)["']"#).expect("valid src regex");
    static ref WIDTH: Regex = Regex::new(r#"(?i)\swidth\s*=\s*["']?(\d*)"#).expect("valid width regex");
    static ref HEIGHT: Regex = Regex::new(r#"(?i)\sheight\s*=\s*["']?(\d*)"#).expect("valid height regex");
}

struct InlineImage {
    mimetype: String,
    contents: Vec<u8>,
    dimensions: Option<(u32, u32)>,
}

/// Pictures of a message that its HTML references through `cid:` URLs.
///
pub(crate) struct InlineImages {
    by_content_id: HashMap<String, InlineImage>,
}

impl InlineImages {
    /// Collects every image part carrying a Content-ID.
    ///
    pub(crate) fn collect(message: &Message) -> Self {
        let mut by_content_id = HashMap::new();
        for part in &message.parts {
            let (Some(content_id), Some(content_type)) = (part.content_id(), part.content_type()) else {
                continue;
            };
            if !content_type.ctype().eq_ignore_ascii_case("image") {
                continue;
            }

            let mimetype = match content_type.subtype() {
                Some(subtype) => format!("image/{}", subtype),
                None => "application/octet-stream".to_string(),
            };
            let contents = part.contents().to_vec();
            let dimensions = image::load_from_memory(&contents)
                .ok()
                .map(|img| (img.width(), img.height()));

            let content_id = content_id.trim_matches(|c| c == '<' || c == '>').to_string();
            debug!("Found inline image '{}' ({:?})", content_id, dimensions);
            by_content_id.insert(content_id, InlineImage { mimetype, contents, dimensions });
        }
        Self { by_content_id }
    }

    /// Rewrites `cid:` image sources of `html` into `data:` URLs.
    ///
    /// An embedded picture without explicit dimensions gets its natural `width` and `height`, so it can be
    /// fitted to the page at render time. One given in pixels gets the other from the natural aspect ratio.
    ///
    pub(crate) fn embed(&self, html: &str) -> String {
        if self.by_content_id.is_empty() {
            return html.to_string();
        }
        IMG_TAG
            .replace_all(html, |caps: &Captures| self.embed_tag(&caps[0]))
            .into_owned()
    }

    fn embed_tag(&self, tag: &str) -> String {
        let Some(image) = CID_SRC
            .captures(tag)
            .and_then(|src| self.by_content_id.get(&src[1]))
        else {
            return tag.to_string();
        };

        let src = format!(" src=\"data:{};base64,{}\"", image.mimetype, STANDARD.encode(&image.contents));
        let mut embedded = CID_SRC.replace(tag, NoExpand(&src)).into_owned();
        if let Some(size) = image.dimensions.and_then(|natural| missing_size(tag, natural)) {
            embedded.insert_str("<img".len(), &size);
        }
        embedded
    }
}

/// The attributes to add to a tag showing a picture of `natural` size, or [`None`] to leave it alone.
fn missing_size(tag: &str, (natural_width, natural_height): (u32, u32)) -> Option<String> {
    let pixels = |attribute: &Regex| attribute.captures(tag).map(|caps| caps[1].parse::<u32>().ok());
    let scaled = |value: u32, to: u32, from: u32| {
        let scaled = (value as u64 * to as u64 + from as u64 / 2) / from.max(1) as u64;
        scaled.clamp(1, u32::MAX as u64) as u32
    };
    match (pixels(&WIDTH), pixels(&HEIGHT)) {
        (None, None) => Some(format!(" width=\"{}\" height=\"{}\"", natural_width, natural_height)),
        (Some(Some(width)), None) => {
            Some(format!(" height=\"{}\"", scaled(width, natural_height, natural_width)))
        }
        (None, Some(Some(height))) => {
            Some(format!(" width=\"{}\"", scaled(height, natural_width, natural_height)))
        }
        _ => None,
    }
}
