//! WordprocessingML package: quick-xml for the body, zip for the container.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{DOCUMENT_TITLE, DocumentMetadata, paragraphs};
use crate::error::ScribeError;

const WORDML_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

pub(super) fn write_docx(path: &Path, text: &str, metadata: &DocumentMetadata) -> Result<(), ScribeError> {
    let render_err = |e: &dyn std::fmt::Display| ScribeError::RenderFailed(format!("{:?}: {}", path, e));

    let document = document_xml(text, metadata).map_err(|e| render_err(&e))?;

    let file = File::create(path).map_err(|e| render_err(&e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let parts: [(&str, &[u8]); 3] = [
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", ROOT_RELS.as_bytes()),
        ("word/document.xml", &document),
    ];
    for (name, body) in parts {
        zip.start_file(name, options).map_err(|e| render_err(&e))?;
        zip.write_all(body).map_err(|e| render_err(&e))?;
    }

    zip.finish().map_err(|e| render_err(&e))?;
    Ok(())
}

/// XML 1.0 forbids control characters other than tab and newline
fn strip_control(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect()
}

/// Run formatting for a paragraph
#[derive(Debug, Clone, Copy, Default)]
struct RunStyle {
    bold: bool,
    italic: bool,
    /// Font size in half-points
    size: Option<u32>,
}

const TITLE: RunStyle = RunStyle { bold: true, italic: false, size: Some(40) };
const HEADING: RunStyle = RunStyle { bold: true, italic: false, size: Some(28) };
const META: RunStyle = RunStyle { bold: false, italic: true, size: None };

fn write_paragraph<W: Write>(
    writer: &mut Writer<W>,
    text: &str,
    style: RunStyle,
) -> std::io::Result<()> {
    writer.write_event(Event::Start(BytesStart::new("w:p")))?;
    writer.write_event(Event::Start(BytesStart::new("w:r")))?;

    if style.bold || style.italic || style.size.is_some() {
        writer.write_event(Event::Start(BytesStart::new("w:rPr")))?;
        if style.bold {
            writer.write_event(Event::Empty(BytesStart::new("w:b")))?;
        }
        if style.italic {
            writer.write_event(Event::Empty(BytesStart::new("w:i")))?;
        }
        if let Some(size) = style.size {
            let size = size.to_string();
            writer.write_event(Event::Empty(
                BytesStart::new("w:sz").with_attributes([("w:val", size.as_str())]),
            ))?;
        }
        writer.write_event(Event::End(BytesEnd::new("w:rPr")))?;
    }

    writer.write_event(Event::Start(
        BytesStart::new("w:t").with_attributes([("xml:space", "preserve")]),
    ))?;
    writer.write_event(Event::Text(BytesText::new(&strip_control(text))))?;
    writer.write_event(Event::End(BytesEnd::new("w:t")))?;

    writer.write_event(Event::End(BytesEnd::new("w:r")))?;
    writer.write_event(Event::End(BytesEnd::new("w:p")))?;
    Ok(())
}

fn document_xml(text: &str, metadata: &DocumentMetadata) -> std::io::Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    writer.write_event(Event::Start(
        BytesStart::new("w:document").with_attributes([("xmlns:w", WORDML_NS)]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("w:body")))?;

    write_paragraph(&mut writer, DOCUMENT_TITLE, TITLE)?;
    for line in metadata.lines() {
        write_paragraph(&mut writer, &line, META)?;
    }
    writer.write_event(Event::Empty(BytesStart::new("w:p")))?;
    write_paragraph(&mut writer, "Transcription:", HEADING)?;
    for p in paragraphs(text) {
        write_paragraph(&mut writer, p, RunStyle::default())?;
    }

    writer.write_event(Event::End(BytesEnd::new("w:body")))?;
    writer.write_event(Event::End(BytesEnd::new("w:document")))?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::Reader;
    use std::io::Read;

    /// Unescaped text of every `w:t` element, in order
    fn texts(xml: &str) -> Vec<String> {
        let mut reader = Reader::from_str(xml);
        let mut out = Vec::new();
        loop {
            match reader.read_event().unwrap() {
                Event::Text(e) => out.push(e.unescape().unwrap().to_string()),
                Event::Eof => break,
                _ => {}
            }
        }
        out
    }

    fn metadata(filename: &str) -> DocumentMetadata {
        DocumentMetadata {
            filename: filename.into(),
            timestamp: "20240101_120000".into(),
            duration_secs: None,
        }
    }

    #[test]
    fn test_docx_package_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.docx");

        write_docx(&path, "first & foremost\n\nsecond", &metadata("a<b>.wav")).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        for name in ["[Content_Types].xml", "_rels/.rels", "word/document.xml"] {
            assert!(archive.by_name(name).is_ok(), "missing {}", name);
        }

        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        assert!(xml.contains("first &amp; foremost"));

        let texts = texts(&xml);
        assert_eq!(texts[0], DOCUMENT_TITLE);
        assert!(texts.contains(&"Original file: a<b>.wav".to_string()));
        assert!(!texts.iter().any(|t| t.starts_with("Duration")));
        assert_eq!(&texts[texts.len() - 2..], ["first & foremost", "second"]);
    }

    #[test]
    fn test_control_chars_are_dropped() {
        let xml = document_xml("a\u{1}b\tc", &metadata("x.wav")).unwrap();
        let xml = String::from_utf8(xml).unwrap();
        assert_eq!(texts(&xml).last().unwrap(), "ab\tc");
    }
}
