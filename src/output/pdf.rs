//! Minimal PDF 1.4 writer: Helvetica text pages, no external fonts.

use std::path::Path;

use super::{DOCUMENT_TITLE, DocumentMetadata, paragraphs};
use crate::error::ScribeError;

const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;
const MARGIN: u32 = 72;
const LINE_HEIGHT: u32 = 14;
/// Characters per line for 10pt Helvetica inside the margins
const WRAP_COLUMNS: usize = 85;

/// One positioned line of text
struct Line {
    text: String,
    size: u32,
}

impl Line {
    fn new(text: impl Into<String>, size: u32) -> Self {
        Self { text: text.into(), size }
    }

    fn blank() -> Self {
        Self::new("", 10)
    }
}

pub(super) fn write_pdf(path: &Path, text: &str, metadata: &DocumentMetadata) -> Result<(), ScribeError> {
    let bytes = render_pdf(text, metadata);
    std::fs::write(path, bytes).map_err(|e| ScribeError::RenderFailed(format!("{:?}: {}", path, e)))
}

fn layout(text: &str, metadata: &DocumentMetadata) -> Vec<Line> {
    let mut lines = vec![Line::new(DOCUMENT_TITLE, 16), Line::blank()];
    lines.extend(metadata.lines().into_iter().map(|l| Line::new(l, 10)));
    lines.push(Line::blank());
    lines.push(Line::new("Transcription:", 12));
    lines.push(Line::blank());

    for paragraph in paragraphs(text) {
        lines.extend(wrap(paragraph, WRAP_COLUMNS).into_iter().map(|l| Line::new(l, 10)));
        lines.push(Line::blank());
    }
    lines
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap(paragraph: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in paragraph.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }

        let current_len = current.chars().count();
        if current_len > 0 && current_len + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Encode a line as a PDF string literal in WinAnsi; unmappable chars become '?'.
fn pdf_string(text: &str) -> Vec<u8> {
    let mut out = vec![b'('];
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            ' '..='~' => out.push(c as u8),
            // Latin-1 range maps directly in WinAnsiEncoding
            '\u{a0}'..='\u{ff}' => out.push(c as u32 as u8),
            '\u{2018}' | '\u{2019}' => out.push(b'\''),
            '\u{201c}' | '\u{201d}' => out.push(b'"'),
            '\u{2013}' | '\u{2014}' => out.push(b'-'),
            '\u{2026}' => out.extend_from_slice(b"..."),
            _ => out.push(b'?'),
        }
    }
    out.push(b')');
    out
}

fn page_streams(lines: &[Line]) -> Vec<Vec<u8>> {
    let per_page = ((PAGE_HEIGHT - 2 * MARGIN) / LINE_HEIGHT) as usize;
    let mut pages: Vec<Vec<u8>> = lines
        .chunks(per_page)
        .map(|page| {
            let mut stream = Vec::new();
            stream.extend_from_slice(b"BT\n");
            stream.extend_from_slice(
                format!("{} {} Td\n", MARGIN, PAGE_HEIGHT - MARGIN).as_bytes(),
            );
            stream.extend_from_slice(format!("{} TL\n", LINE_HEIGHT).as_bytes());
            for line in page {
                stream.extend_from_slice(format!("/F1 {} Tf\n", line.size).as_bytes());
                stream.extend_from_slice(&pdf_string(&line.text));
                stream.extend_from_slice(b" Tj T*\n");
            }
            stream.extend_from_slice(b"ET\n");
            stream
        })
        .collect();

    if pages.is_empty() {
        pages.push(b"BT ET\n".to_vec());
    }
    pages
}

fn render_pdf(text: &str, metadata: &DocumentMetadata) -> Vec<u8> {
    let streams = page_streams(&layout(text, metadata));
    let page_count = streams.len();

    // Object numbers: 1 catalog, 2 pages, 3 font, then (page, contents) pairs
    let mut objects: Vec<Vec<u8>> = Vec::with_capacity(3 + 2 * page_count);
    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());

    let kids: Vec<String> = (0..page_count).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    objects.push(
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            page_count
        )
        .into_bytes(),
    );
    objects.push(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_vec(),
    );

    for (i, stream) in streams.into_iter().enumerate() {
        let contents_id = 5 + 2 * i;
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                PAGE_WIDTH, PAGE_HEIGHT, contents_id
            )
            .into_bytes(),
        );

        let mut contents = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        contents.extend_from_slice(&stream);
        contents.extend_from_slice(b"endstream");
        objects.push(contents);
    }

    let mut buffer: Vec<u8> = Vec::new();
    buffer.extend_from_slice(b"%PDF-1.4\n");

    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(buffer.len());
        buffer.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        buffer.extend_from_slice(body);
        buffer.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = buffer.len();
    buffer.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    buffer.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        buffer.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    buffer.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );

    buffer
}
