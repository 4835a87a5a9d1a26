use std::io;
use std::io::Write;

use html_escape::encode_text;
use mail_parser::{Message, PartType};

use crate::snapshot::formatter::format_address;
use crate::snapshot::inline::InlineImages;

mod formatter;
mod inline;

/// Writes `message` as a standalone HTML document.
///
/// The document holds the From, Sent, To, Cc and Subject headers followed by the body. HTML bodies are
/// preferred over text bodies; pictures referenced by `cid:` are embedded.
///
pub(crate) fn write_html(message: &Message, writer: &mut impl Write) -> io::Result<()> {
    let images = InlineImages::collect(message);

    writer.write_all(b"<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n")?;
    writeln!(writer, "<title>{}</title>", encode_text(message.subject().unwrap_or_default()))?;
    writer.write_all(b"</head>\n<body>\n")?;

    for (name, value) in header_lines(message) {
        writeln!(writer, "<div><b>{}</b>: {}</div>", name, encode_text(&value))?;
    }
    writer.write_all(b"<hr>\n")?;

    let bodies = if message.html_body_count() > 0 {
        message.html_bodies()
    } else {
        message.text_bodies()
    };
    for part in bodies {
        match &part.body {
            PartType::Html(html) => {
                writer.write_all(b"<div>")?;
                writer.write_all(images.embed(html).as_bytes())?;
                writer.write_all(b"</div>\n")?;
            }
            PartType::Text(text) => {
                writer.write_all(b"<div>")?;
                writer.write_all(paragraphs(text).as_bytes())?;
                writer.write_all(b"</div>\n")?;
            }
            _ => (),
        }
    }

    writer.write_all(b"</body>\n</html>\n")
}

fn header_lines(message: &Message) -> Vec<(&'static str, String)> {
    let mut lines = vec![];
    if let Some(from) = message.from().and_then(format_address) {
        lines.push(("From", from));
    }
    if let Some(date) = message.date() {
        lines.push(("Sent", date.to_string()));
    }
    if let Some(to) = message.to().and_then(format_address) {
        lines.push(("To", to));
    }
    if let Some(cc) = message.cc().and_then(format_address) {
        lines.push(("Cc", cc));
    }
    if let Some(subject) = message.subject() {
        lines.push(("Subject", subject.to_string()));
    }
    lines
}

fn paragraphs(text: &str) -> String {
    text.lines()
        .map(|line| format!("<p>{}</p>", encode_text(line)))
        .collect::<Vec<String>>()
        .join("\n")
}
