//! Builds small DOCX packages on disk for tests.
//!
//! Only the parts the built-in reader looks at are written. Enabled for
//! downstream crates with the `test-fixtures` feature.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use zip::ZipWriter;
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const WP_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const PIC_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";

/// Stand-in image payload. The reader copies bytes without decoding them.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfolio-test-image";

/// Fluent builder for a minimal `.docx` file.
#[derive(Debug, Default, Clone)]
pub struct DocxBuilder {
    body: Vec<String>,
    /// `(id, type, target, external)`
    rels: Vec<(String, &'static str, String, bool)>,
    media: Vec<(String, Vec<u8>)>,
    title: Option<String>,
    author: Option<String>,
}

impl DocxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }

    /// Paragraph styled `Heading{level}`.
    pub fn heading(mut self, level: u8, text: &str) -> Self {
        self.body.push(format!(
            r#"<w:p><w:pPr><w:pStyle w:val="Heading{level}"/></w:pPr>{}</w:p>"#,
            run(text, "")
        ));
        self
    }

    pub fn paragraph(mut self, text: &str) -> Self {
        self.body.push(format!("<w:p>{}</w:p>", run(text, "")));
        self
    }

    /// Paragraph made of `(text, bold, italic)` runs.
    pub fn runs(mut self, runs: &[(&str, bool, bool)]) -> Self {
        let mut xml = String::from("<w:p>");
        for (text, bold, italic) in runs {
            let mut rpr = String::new();
            if *bold {
                rpr.push_str("<w:b/>");
            }
            if *italic {
                rpr.push_str("<w:i/>");
            }
            xml.push_str(&run(text, &rpr));
        }
        xml.push_str("</w:p>");
        self.body.push(xml);
        self
    }

    /// List item; `numId` 1 is bulleted and 2 is decimal.
    pub fn list_item(mut self, text: &str, ordered: bool, level: u8) -> Self {
        let num_id = if ordered { 2 } else { 1 };
        self.body.push(format!(
            r#"<w:p><w:pPr><w:numPr><w:ilvl w:val="{level}"/><w:numId w:val="{num_id}"/></w:numPr></w:pPr>{}</w:p>"#,
            run(text, "")
        ));
        self
    }

    /// Paragraph containing `before`, an external hyperlink, then `after`.
    pub fn link(mut self, before: &str, text: &str, url: &str, after: &str) -> Self {
        let id = self.add_rel("hyperlink", url, true);
        self.body.push(format!(
            r#"<w:p>{}<w:hyperlink r:id="{id}">{}</w:hyperlink>{}</w:p>"#,
            run(before, ""),
            run(text, ""),
            run(after, "")
        ));
        self
    }

    /// Paragraph with an embedded picture stored at `word/media/<file_name>`.
    pub fn image(mut self, file_name: &str, bytes: &[u8], alt: &str) -> Self {
        let part = format!("word/media/{file_name}");
        if !self.media.iter().any(|(p, _)| *p == part) {
            self.media.push((part, bytes.to_vec()));
        }
        let id = self.add_rel("image", &format!("media/{file_name}"), false);
        let alt = escape_xml(alt);
        self.body.push(format!(
            r#"<w:p><w:r><w:drawing><wp:inline><wp:docPr id="1" name="Picture" descr="{alt}"/><a:graphic><a:graphicData><pic:pic><pic:blipFill><a:blip r:embed="{id}"/></pic:blipFill></pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>"#
        ));
        self
    }

    /// Table of plain-text cells; the first row is marked as a header row when `header` is set.
    pub fn table(mut self, rows: &[&[&str]], header: bool) -> Self {
        let mut xml = String::from("<w:tbl>");
        for (i, row) in rows.iter().enumerate() {
            xml.push_str("<w:tr>");
            if header && i == 0 {
                xml.push_str("<w:trPr><w:tblHeader/></w:trPr>");
            }
            for cell in *row {
                xml.push_str(&format!("<w:tc><w:p>{}</w:p></w:tc>", run(cell, "")));
            }
            xml.push_str("</w:tr>");
        }
        xml.push_str("</w:tbl>");
        self.body.push(xml);
        self
    }

    /// Append raw WordprocessingML to the body, for structures the other
    /// helpers cannot express.
    pub fn raw_body(mut self, xml: &str) -> Self {
        self.body.push(xml.to_string());
        self
    }

    /// Write the package to `path`.
    pub fn write(&self, path: &Path) -> ZipResult<()> {
        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);

        zip.start_file("[Content_Types].xml", SimpleFileOptions::default())?;
        zip.write_all(CONTENT_TYPES.as_bytes())?;

        zip.start_file("_rels/.rels", SimpleFileOptions::default())?;
        zip.write_all(PACKAGE_RELS.as_bytes())?;

        zip.start_file("word/document.xml", SimpleFileOptions::default())?;
        zip.write_all(self.document_xml().as_bytes())?;

        zip.start_file("word/_rels/document.xml.rels", SimpleFileOptions::default())?;
        zip.write_all(self.rels_xml().as_bytes())?;

        zip.start_file("word/styles.xml", SimpleFileOptions::default())?;
        zip.write_all(styles_xml().as_bytes())?;

        zip.start_file("word/numbering.xml", SimpleFileOptions::default())?;
        zip.write_all(NUMBERING.as_bytes())?;

        if self.title.is_some() || self.author.is_some() {
            zip.start_file("docProps/core.xml", SimpleFileOptions::default())?;
            zip.write_all(self.core_xml().as_bytes())?;
        }

        for (part, bytes) in &self.media {
            zip.start_file(part.as_str(), SimpleFileOptions::default())?;
            zip.write_all(bytes)?;
        }

        zip.finish()?;
        Ok(())
    }

    fn add_rel(&mut self, kind: &'static str, target: &str, external: bool) -> String {
        let id = format!("rId{}", self.rels.len() + 10);
        self.rels.push((id.clone(), kind, target.to_string(), external));
        id
    }

    fn document_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="{W_NS}" xmlns:r="{R_NS}" xmlns:wp="{WP_NS}" xmlns:a="{A_NS}" xmlns:pic="{PIC_NS}"><w:body>{}<w:sectPr/></w:body></w:document>"#,
            self.body.join("")
        )
    }

    fn rels_xml(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        for (id, kind, target, external) in &self.rels {
            let mode = if *external { r#" TargetMode="External""# } else { "" };
            xml.push_str(&format!(
                r#"<Relationship Id="{id}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/{kind}" Target="{}"{mode}/>"#,
                escape_xml(target)
            ));
        }
        xml.push_str("</Relationships>");
        xml
    }

    fn core_xml(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/">"#,
        );
        if let Some(title) = &self.title {
            xml.push_str(&format!("<dc:title>{}</dc:title>", escape_xml(title)));
        }
        if let Some(author) = &self.author {
            xml.push_str(&format!("<dc:creator>{}</dc:creator>", escape_xml(author)));
        }
        xml.push_str("</cp:coreProperties>");
        xml
    }
}

/// Write a file with a `.docx` name that is not a ZIP package.
pub fn write_corrupt_docx(path: &Path) -> std::io::Result<()> {
    fs::write(path, b"this is not a zip archive")
}

fn run(text: &str, rpr: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let props = if rpr.is_empty() {
        String::new()
    } else {
        format!("<w:rPr>{rpr}</w:rPr>")
    };
    format!(
        r#"<w:r>{props}<w:t xml:space="preserve">{}</w:t></w:r>"#,
        escape_xml(text)
    )
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn styles_xml() -> String {
    let mut xml = format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:styles xmlns:w="{W_NS}">"#);
    xml.push_str(r#"<w:style w:type="paragraph" w:styleId="Normal"><w:name w:val="Normal"/></w:style>"#);
    for level in 1..=6 {
        xml.push_str(&format!(
            r#"<w:style w:type="paragraph" w:styleId="Heading{level}"><w:name w:val="heading {level}"/><w:basedOn w:val="Normal"/></w:style>"#
        ));
    }
    xml.push_str("</w:styles>");
    xml
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="png" ContentType="image/png"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const NUMBERING: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:numbering xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:abstractNum w:abstractNumId="0"><w:lvl w:ilvl="0"><w:numFmt w:val="bullet"/></w:lvl><w:lvl w:ilvl="1"><w:numFmt w:val="bullet"/></w:lvl></w:abstractNum><w:abstractNum w:abstractNumId="1"><w:lvl w:ilvl="0"><w:numFmt w:val="decimal"/></w:lvl><w:lvl w:ilvl="1"><w:numFmt w:val="lowerLetter"/></w:lvl></w:abstractNum><w:num w:numId="1"><w:abstractNumId w:val="0"/></w:num><w:num w:numId="2"><w:abstractNumId w:val="1"/></w:num></w:numbering>"#;
