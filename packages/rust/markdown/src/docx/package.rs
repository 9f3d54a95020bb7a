//! Access to the parts of a DOCX ZIP package.
//!
//! Parts used:
//! - `word/document.xml`: body content
//! - `word/_rels/document.xml.rels`: relationships (images, hyperlinks)
//! - `word/styles.xml`: paragraph styles (heading levels)
//! - `word/numbering.xml`: list formats
//! - `docProps/core.xml`, `docProps/app.xml`: document metadata

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use zip::ZipArchive;
use zip::result::ZipError;

use folio_shared::{FolioError, Result};

pub(crate) const DOCUMENT_PART: &str = "word/document.xml";
const RELS_PART: &str = "word/_rels/document.xml.rels";
const STYLES_PART: &str = "word/styles.xml";
const NUMBERING_PART: &str = "word/numbering.xml";
const CORE_PART: &str = "docProps/core.xml";
const APP_PART: &str = "docProps/app.xml";

/// Largest part the reader inflates. The size a package declares for a part
/// is not trusted.
const MAX_PART_BYTES: u64 = 256 * 1024 * 1024;

// ---------------------------------------------------------------------------
// XML helpers
// ---------------------------------------------------------------------------

/// Attribute value by local name, whatever its namespace prefix.
pub(crate) fn attr<'a>(node: Node<'a, '_>, local: &str) -> Option<&'a str> {
    node.attributes()
        .find(|a| a.name() == local)
        .map(|a| a.value())
}

/// First element child with the given local name.
pub(crate) fn child<'a, 'input>(node: Node<'a, 'input>, local: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == local)
}

/// `w:val` of the named child element.
pub(crate) fn child_val<'a>(node: Node<'a, '_>, local: &str) -> Option<&'a str> {
    child(node, local).and_then(|c| attr(c, "val"))
}

/// On/off properties (`<w:b/>`, `<w:b w:val="0"/>`).
pub(crate) fn is_on(node: Node<'_, '_>) -> bool {
    !matches!(attr(node, "val"), Some("0" | "false" | "off"))
}

fn parse_xml<'input>(part: &str, xml: &'input str, source: &Path) -> Result<Document<'input>> {
    Document::parse(xml)
        .map_err(|e| FolioError::conversion(source, format!("malformed XML in {part}: {e}")))
}

// ---------------------------------------------------------------------------
// Package
// ---------------------------------------------------------------------------

/// An opened DOCX package.
pub(crate) struct DocxPackage {
    archive: ZipArchive<File>,
    source: PathBuf,
    part_limit: u64,
}

impl DocxPackage {
    pub(crate) fn open(source: &Path) -> Result<Self> {
        let file = File::open(source).map_err(|e| FolioError::io(source, e))?;
        let archive = ZipArchive::new(file).map_err(|e| {
            FolioError::conversion(source, format!("not a valid DOCX package: {e}"))
        })?;
        Ok(Self {
            archive,
            source: source.to_path_buf(),
            part_limit: MAX_PART_BYTES,
        })
    }

    #[cfg(test)]
    fn with_part_limit(mut self, limit: u64) -> Self {
        self.part_limit = limit;
        self
    }

    pub(crate) fn source(&self) -> &Path {
        &self.source
    }

    /// Raw bytes of a part, `None` when the package does not contain it.
    pub(crate) fn read_bytes(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(FolioError::conversion(
                    &self.source,
                    format!("cannot read {name}: {e}"),
                ));
            }
        };

        let limit = self.part_limit;
        let buf = read_limited(&mut entry, limit)
            .map_err(|e| FolioError::conversion(&self.source, format!("cannot read {name}: {e}")))?
            .ok_or_else(|| {
                FolioError::conversion(&self.source, format!("{name} is larger than {limit} bytes"))
            })?;
        Ok(Some(buf))
    }

    /// A part decoded as UTF-8 text.
    pub(crate) fn read_text(&mut self, name: &str) -> Result<Option<String>> {
        match self.read_bytes(name)? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                FolioError::conversion(&self.source, format!("{name} is not UTF-8: {e}"))
            }),
            None => Ok(None),
        }
    }

    /// `word/document.xml`, which every DOCX must contain.
    pub(crate) fn document_xml(&mut self) -> Result<String> {
        self.read_text(DOCUMENT_PART)?.ok_or_else(|| {
            FolioError::conversion(&self.source, format!("package has no {DOCUMENT_PART}"))
        })
    }

    pub(crate) fn relationships(&mut self) -> Result<Relationships> {
        match self.read_text(RELS_PART)? {
            Some(xml) => Relationships::parse(&xml, &self.source),
            None => Ok(Relationships::default()),
        }
    }

    pub(crate) fn styles(&mut self) -> Result<Styles> {
        match self.read_text(STYLES_PART)? {
            Some(xml) => Styles::parse(&xml, &self.source),
            None => Ok(Styles::default()),
        }
    }

    pub(crate) fn numbering(&mut self) -> Result<Numbering> {
        match self.read_text(NUMBERING_PART)? {
            Some(xml) => Numbering::parse(&xml, &self.source),
            None => Ok(Numbering::default()),
        }
    }

    pub(crate) fn properties(&mut self) -> Result<DocProperties> {
        let mut props = DocProperties::default();
        if let Some(xml) = self.read_text(CORE_PART)? {
            props.read_core(&xml, &self.source)?;
        }
        if let Some(xml) = self.read_text(APP_PART)? {
            props.read_app(&xml, &self.source)?;
        }
        Ok(props)
    }
}

/// Read everything from `reader` unless it holds more than `limit` bytes.
fn read_limited(reader: impl Read, limit: u64) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Ok(None);
    }
    Ok(Some(buf))
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

/// One `<Relationship>` of the main document part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Relationship {
    pub target: String,
    pub external: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Relationships {
    by_id: HashMap<String, Relationship>,
}

impl Relationships {
    fn parse(xml: &str, source: &Path) -> Result<Self> {
        let doc = parse_xml(RELS_PART, xml, source)?;
        let by_id = doc
            .root_element()
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "Relationship")
            .filter_map(|n| {
                let id = attr(n, "Id")?;
                let target = attr(n, "Target")?;
                Some((
                    id.to_string(),
                    Relationship {
                        target: target.to_string(),
                        external: attr(n, "TargetMode") == Some("External"),
                    },
                ))
            })
            .collect();
        Ok(Self { by_id })
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Relationship> {
        self.by_id.get(id)
    }
}

/// Resolve an internal relationship target (relative to `word/`) to a ZIP entry name.
pub(crate) fn part_name(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => {
            let mut parts: Vec<&str> = vec!["word"];
            for segment in target.split('/') {
                match segment {
                    "" | "." => {}
                    ".." => {
                        parts.pop();
                    }
                    s => parts.push(s),
                }
            }
            parts.join("/")
        }
    }
}

// ---------------------------------------------------------------------------
// Styles
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct StyleDef {
    name: Option<String>,
    outline_level: Option<u8>,
    based_on: Option<String>,
}

/// Paragraph styles, used to find heading levels.
#[derive(Debug, Default)]
pub(crate) struct Styles {
    by_id: HashMap<String, StyleDef>,
}

impl Styles {
    fn parse(xml: &str, source: &Path) -> Result<Self> {
        let doc = parse_xml(STYLES_PART, xml, source)?;
        let mut by_id = HashMap::new();

        for style in doc
            .root_element()
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "style")
        {
            if attr(style, "type").is_some_and(|t| t != "paragraph") {
                continue;
            }
            let Some(id) = attr(style, "styleId") else {
                continue;
            };
            let outline_level = child(style, "pPr")
                .and_then(|ppr| child_val(ppr, "outlineLvl"))
                .and_then(|v| v.parse().ok());

            by_id.insert(
                id.to_string(),
                StyleDef {
                    name: child_val(style, "name").map(str::to_string),
                    outline_level,
                    based_on: child_val(style, "basedOn").map(str::to_string),
                },
            );
        }

        Ok(Self { by_id })
    }

    /// Heading level (1–6) implied by a paragraph style, following `basedOn`.
    pub(crate) fn heading_level(&self, style_id: &str) -> Option<u8> {
        let mut current = Some(style_id);
        // Guard against basedOn cycles in hand-edited packages.
        for _ in 0..16 {
            let id = current?;
            let Some(def) = self.by_id.get(id) else {
                return heading_from_name(id);
            };
            if let Some(lvl) = def.outline_level {
                return outline_to_heading(lvl);
            }
            if let Some(level) = def.name.as_deref().and_then(heading_from_name) {
                return Some(level);
            }
            current = def.based_on.as_deref();
        }
        None
    }
}

/// `w:outlineLvl` is zero-based; 9 means body text.
pub(crate) fn outline_to_heading(level: u8) -> Option<u8> {
    (level < 9).then(|| (level + 1).min(6))
}

/// Recognize `heading 2`, `Heading2`, `Title`.
fn heading_from_name(name: &str) -> Option<u8> {
    let lower = name.to_ascii_lowercase();
    if lower == "title" {
        return Some(1);
    }
    let digits = lower.strip_prefix("heading")?.trim();
    digits
        .parse::<u8>()
        .ok()
        .filter(|n| (1..=9).contains(n))
        .map(|n| n.min(6))
}

// ---------------------------------------------------------------------------
// Numbering
// ---------------------------------------------------------------------------

/// List formats per `(numId, ilvl)`.
#[derive(Debug, Default)]
pub(crate) struct Numbering {
    formats: HashMap<(String, u8), String>,
}

impl Numbering {
    fn parse(xml: &str, source: &Path) -> Result<Self> {
        let doc = parse_xml(NUMBERING_PART, xml, source)?;
        let root = doc.root_element();

        let mut abstract_levels: HashMap<&str, HashMap<u8, String>> = HashMap::new();
        for abs in root
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "abstractNum")
        {
            let Some(abs_id) = attr(abs, "abstractNumId") else {
                continue;
            };
            let levels = abs
                .children()
                .filter(|n| n.is_element() && n.tag_name().name() == "lvl")
                .filter_map(|lvl| {
                    let ilvl = attr(lvl, "ilvl")?.parse().ok()?;
                    let fmt = child_val(lvl, "numFmt").unwrap_or("decimal");
                    Some((ilvl, fmt.to_string()))
                })
                .collect();
            abstract_levels.insert(abs_id, levels);
        }

        let mut formats = HashMap::new();
        for num in root
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "num")
        {
            let (Some(num_id), Some(abs_id)) = (attr(num, "numId"), child_val(num, "abstractNumId"))
            else {
                continue;
            };
            if let Some(levels) = abstract_levels.get(abs_id) {
                for (ilvl, fmt) in levels {
                    formats.insert((num_id.to_string(), *ilvl), fmt.clone());
                }
            }
        }

        Ok(Self { formats })
    }

    /// Whether the list level renders as bullets. Unknown levels default to bullets.
    pub(crate) fn is_bullet(&self, num_id: &str, ilvl: u8) -> bool {
        self.formats
            .get(&(num_id.to_string(), ilvl))
            .is_none_or(|fmt| fmt == "bullet" || fmt == "none")
    }
}

// ---------------------------------------------------------------------------
// Document properties
// ---------------------------------------------------------------------------

/// Metadata from `docProps/core.xml` and `docProps/app.xml`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DocProperties {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub last_modified_by: Option<String>,
    pub company: Option<String>,
}

impl DocProperties {
    fn read_core(&mut self, xml: &str, source: &Path) -> Result<()> {
        let doc = parse_xml(CORE_PART, xml, source)?;
        for node in doc.root_element().children().filter(|n| n.is_element()) {
            let value = non_empty(node.text());
            match node.tag_name().name() {
                "title" => self.title = value,
                "creator" => self.author = value,
                "subject" => self.subject = value,
                "description" => self.description = value,
                "keywords" => self.keywords = value,
                "lastModifiedBy" => self.last_modified_by = value,
                _ => {}
            }
        }
        Ok(())
    }

    fn read_app(&mut self, xml: &str, source: &Path) -> Result<()> {
        let doc = parse_xml(APP_PART, xml, source)?;
        if let Some(company) = child(doc.root_element(), "Company") {
            self.company = non_empty(company.text());
        }
        Ok(())
    }

    /// `(key, value)` pairs in front-matter order.
    pub(crate) fn fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("title", &self.title),
            ("author", &self.author),
            ("subject", &self.subject),
            ("description", &self.description),
            ("keywords", &self.keywords),
            ("last_modified_by", &self.last_modified_by),
            ("company", &self.company),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_deref().map(|v| (k, v)))
        .collect()
    }
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const W_NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    #[test]
    fn read_limited_stops_past_the_limit() {
        let data = [7u8; 10];
        assert_eq!(read_limited(&data[..], 10).unwrap(), Some(data.to_vec()));
        assert_eq!(read_limited(&data[..], 4).unwrap(), None);
        assert_eq!(read_limited(&data[..0], 0).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn oversized_part_is_conversion_error() {
        let dir = std::env::temp_dir().join(format!("folio-package-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let source = dir.join("big.docx");
        crate::fixture::DocxBuilder::new()
            .image("image1.png", &[0u8; 100], "big")
            .write(&source)
            .unwrap();

        let mut package = DocxPackage::open(&source).unwrap().with_part_limit(64);
        let err = package.read_bytes("word/media/image1.png").unwrap_err();
        match err {
            FolioError::Conversion { message, .. } => assert!(message.contains("larger than 64 bytes")),
            other => panic!("expected conversion error, got {other:?}"),
        }
        assert!(package.read_bytes("word/missing.xml").unwrap().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn part_name_resolves_relative_targets() {
        assert_eq!(part_name("media/image1.png"), "word/media/image1.png");
        assert_eq!(part_name("../media/x.png"), "media/x.png");
        assert_eq!(part_name("/word/media/a.jpeg"), "word/media/a.jpeg");
    }

    #[test]
    fn relationships_parse_targets_and_modes() {
        let xml = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Id="rId1" Type="image" Target="media/image1.png"/>
            <Relationship Id="rId2" Type="hyperlink" Target="https://example.com" TargetMode="External"/>
        </Relationships>"#;
        let rels = Relationships::parse(xml, Path::new("t.docx")).unwrap();
        assert_eq!(rels.get("rId1").unwrap().target, "media/image1.png");
        assert!(!rels.get("rId1").unwrap().external);
        assert!(rels.get("rId2").unwrap().external);
        assert!(rels.get("rId3").is_none());
    }

    #[test]
    fn styles_resolve_heading_levels() {
        let xml = format!(
            r#"<w:styles {W_NS}>
                <w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/></w:style>
                <w:style w:type="paragraph" w:styleId="Custom"><w:name w:val="Chapter"/><w:pPr><w:outlineLvl w:val="2"/></w:pPr></w:style>
                <w:style w:type="paragraph" w:styleId="Derived"><w:name w:val="Derived"/><w:basedOn w:val="Custom"/></w:style>
                <w:style w:type="paragraph" w:styleId="Normal"><w:name w:val="Normal"/></w:style>
                <w:style w:type="paragraph" w:styleId="Body"><w:pPr><w:outlineLvl w:val="9"/></w:pPr></w:style>
            </w:styles>"#
        );
        let styles = Styles::parse(&xml, Path::new("t.docx")).unwrap();
        assert_eq!(styles.heading_level("Heading1"), Some(1));
        assert_eq!(styles.heading_level("Custom"), Some(3));
        assert_eq!(styles.heading_level("Derived"), Some(3));
        assert_eq!(styles.heading_level("Normal"), None);
        assert_eq!(styles.heading_level("Body"), None);
        // Not declared in styles.xml, recognized by id.
        assert_eq!(styles.heading_level("Heading4"), Some(4));
        assert_eq!(styles.heading_level("Title"), Some(1));
    }

    #[test]
    fn numbering_maps_num_to_abstract_formats() {
        let xml = format!(
            r#"<w:numbering {W_NS}>
                <w:abstractNum w:abstractNumId="0">
                    <w:lvl w:ilvl="0"><w:numFmt w:val="bullet"/></w:lvl>
                </w:abstractNum>
                <w:abstractNum w:abstractNumId="1">
                    <w:lvl w:ilvl="0"><w:numFmt w:val="decimal"/></w:lvl>
                    <w:lvl w:ilvl="1"><w:numFmt w:val="lowerLetter"/></w:lvl>
                </w:abstractNum>
                <w:num w:numId="1"><w:abstractNumId w:val="0"/></w:num>
                <w:num w:numId="2"><w:abstractNumId w:val="1"/></w:num>
            </w:numbering>"#
        );
        let numbering = Numbering::parse(&xml, Path::new("t.docx")).unwrap();
        assert!(numbering.is_bullet("1", 0));
        assert!(!numbering.is_bullet("2", 0));
        assert!(!numbering.is_bullet("2", 1));
        assert!(numbering.is_bullet("9", 0));
    }

    #[test]
    fn core_properties_are_read() {
        let xml = r#"<cp:coreProperties
            xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties"
            xmlns:dc="http://purl.org/dc/elements/1.1/">
            <dc:title>Quarterly Report</dc:title>
            <dc:creator>Ada</dc:creator>
            <dc:subject>  </dc:subject>
            <cp:keywords>finance, q3</cp:keywords>
        </cp:coreProperties>"#;
        let mut props = DocProperties::default();
        props.read_core(xml, Path::new("t.docx")).unwrap();
        assert_eq!(props.title.as_deref(), Some("Quarterly Report"));
        assert_eq!(props.author.as_deref(), Some("Ada"));
        assert_eq!(props.subject, None);
        assert_eq!(
            props.fields(),
            vec![
                ("title", "Quarterly Report"),
                ("author", "Ada"),
                ("keywords", "finance, q3")
            ]
        );
    }

    #[test]
    fn malformed_xml_is_conversion_error() {
        let err = Styles::parse("<w:styles>", Path::new("t.docx")).unwrap_err();
        assert!(matches!(err, FolioError::Conversion { .. }));
    }
}
