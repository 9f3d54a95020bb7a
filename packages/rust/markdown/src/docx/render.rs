//! WordprocessingML body → Markdown.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use roxmltree::Node;
use tracing::{debug, trace};

use folio_shared::{FolioError, Result, derive_base_name};

use super::package::{DocxPackage, Numbering, Relationships, Styles, attr, child, child_val, is_on, outline_to_heading, part_name};
use super::table::{Table, escape_cell};
use crate::{ConvertOptions, HeadingStyle, LinkStyle};

// ---------------------------------------------------------------------------
// Inline model
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Format {
    bold: bool,
    italic: bool,
    strike: bool,
}

impl Format {
    fn open(self) -> String {
        let mut s = String::new();
        if self.strike {
            s.push_str("~~");
        }
        if self.bold {
            s.push_str("**");
        }
        if self.italic {
            s.push('*');
        }
        s
    }

    fn close(self) -> String {
        self.open().chars().rev().collect()
    }
}

#[derive(Debug)]
enum Inline {
    /// Escaped text carrying run formatting.
    Text(String, Format),
    /// Markdown that is emitted as-is.
    Raw(String),
}

/// Join inline pieces, merging adjacent runs with the same formatting so
/// `**a****b**` comes out as `**ab**`.
fn flatten(inlines: Vec<Inline>) -> String {
    let mut merged: Vec<Inline> = Vec::with_capacity(inlines.len());
    for inline in inlines {
        if let Inline::Text(text, fmt) = &inline {
            if let Some(Inline::Text(prev, prev_fmt)) = merged.last_mut() {
                if prev_fmt == fmt {
                    prev.push_str(text);
                    continue;
                }
            }
        }
        merged.push(inline);
    }

    let mut out = String::new();
    for inline in merged {
        match inline {
            Inline::Raw(raw) => out.push_str(&raw),
            Inline::Text(text, fmt) => out.push_str(&wrap_format(&text, fmt)),
        }
    }
    out
}

/// Surround `text` with emphasis markers, keeping edge whitespace outside them.
fn wrap_format(text: &str, fmt: Format) -> String {
    if fmt == Format::default() {
        return text.to_string();
    }
    let core = text.trim();
    if core.is_empty() {
        return text.to_string();
    }
    let lead = &text[..text.len() - text.trim_start().len()];
    let trail = &text[text.trim_end().len()..];
    format!("{lead}{}{core}{}{trail}", fmt.open(), fmt.close())
}

/// Widest table Word can produce; larger `gridSpan` values are corrupt.
const MAX_TABLE_COLUMNS: usize = 63;

/// Backslash-escape characters with Markdown meaning.
pub(crate) fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' | '|' | '~') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a marker at the start of any line that would open a block:
/// ATX headings, list items, setext underlines.
fn escape_block_starts(text: &str) -> String {
    text.split('\n').map(escape_line_start).collect::<Vec<_>>().join("\n")
}

fn escape_line_start(line: &str) -> String {
    let rest = line.trim_start_matches([' ', '\t']);
    let lead = &line[..line.len() - rest.len()];

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 && rest[digits..].starts_with(['.', ')']) {
        return format!("{lead}{}\\{}", &rest[..digits], &rest[digits..]);
    }
    if rest.starts_with(['#', '-', '+', '=']) {
        return format!("{lead}\\{rest}");
    }
    line.to_string()
}

fn angle_if_spaced(target: &str) -> String {
    if target.contains(' ') {
        format!("<{target}>")
    } else {
        target.to_string()
    }
}

fn is_element(node: &Node<'_, '_>, local: &str) -> bool {
    node.is_element() && node.tag_name().name() == local
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Block {
    text: String,
    list_item: bool,
}

fn join_blocks(blocks: &[Block]) -> String {
    let mut out = String::new();
    let mut prev_list = false;
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            out.push_str(if prev_list && block.list_item { "\n" } else { "\n\n" });
        }
        out.push_str(&block.text);
        prev_list = block.list_item;
    }
    out
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders one document body. Holds per-document state: link references,
/// extracted media and list counters.
pub(crate) struct Renderer<'a> {
    package: &'a mut DocxPackage,
    options: &'a ConvertOptions,
    /// Set once the caller stopped waiting for this conversion.
    abandoned: &'a AtomicBool,
    /// Folder below `media/` that keeps this document's images apart from
    /// other documents sharing the media target.
    media_folder: String,
    rels: Relationships,
    styles: Styles,
    numbering: Numbering,
    links: Vec<String>,
    link_index: HashMap<String, usize>,
    /// ZIP part name → Markdown link target.
    media: HashMap<String, String>,
    media_names: HashSet<String>,
    counters: HashMap<(String, u8), usize>,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(
        package: &'a mut DocxPackage,
        options: &'a ConvertOptions,
        abandoned: &'a AtomicBool,
    ) -> Result<Self> {
        let rels = package.relationships()?;
        let styles = package.styles()?;
        let numbering = package.numbering()?;
        let media_folder = media_folder_name(package.source());
        Ok(Self {
            package,
            options,
            abandoned,
            media_folder,
            rels,
            styles,
            numbering,
            links: Vec::new(),
            link_index: HashMap::new(),
            media: HashMap::new(),
            media_names: HashSet::new(),
            counters: HashMap::new(),
        })
    }

    /// Render the `w:body` of a parsed `word/document.xml`.
    pub(crate) fn render(&mut self, document: &roxmltree::Document<'_>) -> Result<String> {
        let body = child(document.root_element(), "body").ok_or_else(|| {
            FolioError::conversion(self.package.source(), "document has no body")
        })?;

        let mut blocks = Vec::new();
        self.render_blocks(body, &mut blocks)?;

        let mut out = join_blocks(&blocks);
        if !self.links.is_empty() {
            out.push_str("\n\n");
            let defs: Vec<String> = self
                .links
                .iter()
                .enumerate()
                .map(|(i, url)| format!("[{}]: {}", i + 1, angle_if_spaced(url)))
                .collect();
            out.push_str(&defs.join("\n"));
        }

        debug!(blocks = blocks.len(), links = self.links.len(), media = self.media.len(), "rendered body");
        Ok(out)
    }

    fn render_blocks(&mut self, parent: Node<'_, '_>, blocks: &mut Vec<Block>) -> Result<()> {
        for node in parent.children().filter(|n| n.is_element()) {
            self.check_abandoned()?;
            match node.tag_name().name() {
                "p" => {
                    if let Some(block) = self.render_paragraph(node)? {
                        blocks.push(block);
                    }
                }
                "tbl" => {
                    let table = self.render_table(node)?;
                    if !table.is_empty() {
                        blocks.push(Block { text: table, list_item: false });
                    }
                }
                "sdt" => {
                    if let Some(content) = child(node, "sdtContent") {
                        self.render_blocks(content, blocks)?;
                    }
                }
                other => trace!(element = other, "ignoring body element"),
            }
        }
        Ok(())
    }

    fn render_paragraph(&mut self, p: Node<'_, '_>) -> Result<Option<Block>> {
        let ppr = child(p, "pPr");
        let text = self.render_inline_children(p)?;
        let text = escape_block_starts(&trim_breaks(&text));
        if text.is_empty() {
            return Ok(None);
        }

        if let Some(level) = ppr.and_then(|ppr| self.heading_level(ppr)) {
            return Ok(Some(Block { text: self.heading(level, &text), list_item: false }));
        }

        if let Some((num_id, ilvl)) = ppr.and_then(list_membership) {
            let marker = self.list_marker(&num_id, ilvl);
            let indent = "    ".repeat(usize::from(ilvl));
            return Ok(Some(Block {
                text: format!("{indent}{marker}{text}"),
                list_item: true,
            }));
        }

        Ok(Some(Block { text, list_item: false }))
    }

    fn heading_level(&self, ppr: Node<'_, '_>) -> Option<u8> {
        if let Some(style) = child_val(ppr, "pStyle") {
            if let Some(level) = self.styles.heading_level(style) {
                return Some(level);
            }
        }
        child_val(ppr, "outlineLvl")
            .and_then(|v| v.parse().ok())
            .and_then(outline_to_heading)
    }

    fn heading(&self, level: u8, text: &str) -> String {
        match (self.options.heading_style, level) {
            (HeadingStyle::Setext, 1 | 2) => {
                let underline = if level == 1 { '=' } else { '-' };
                let width = text.chars().count().max(3);
                format!("{text}\n{}", underline.to_string().repeat(width))
            }
            _ => format!("{} {text}", "#".repeat(usize::from(level))),
        }
    }

    fn list_marker(&mut self, num_id: &str, ilvl: u8) -> String {
        // A shallower item restarts the numbering of deeper levels.
        self.counters
            .retain(|(id, lvl), _| !(id == num_id && *lvl > ilvl));

        if self.numbering.is_bullet(num_id, ilvl) {
            return "- ".to_string();
        }
        let counter = self.counters.entry((num_id.to_string(), ilvl)).or_insert(0);
        *counter += 1;
        format!("{counter}. ")
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    fn render_table(&mut self, tbl: Node<'_, '_>) -> Result<String> {
        let mut table = Table::default();
        for tr in tbl.children().filter(|n| is_element(n, "tr")) {
            let header = child(tr, "trPr")
                .and_then(|trpr| child(trpr, "tblHeader"))
                .is_some_and(is_on);

            let mut cells = Vec::new();
            for tc in tr.children().filter(|n| is_element(n, "tc")) {
                let mut paragraphs = Vec::new();
                for p in tc.children().filter(|n| is_element(n, "p")) {
                    let text = self.render_inline_children(p)?;
                    let text = trim_breaks(&text);
                    if !text.is_empty() {
                        paragraphs.push(escape_cell(&text));
                    }
                }
                cells.push(paragraphs.join("<br/>"));

                let span = child(tc, "tcPr")
                    .and_then(|tcpr| child_val(tcpr, "gridSpan"))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(1);
                if span > MAX_TABLE_COLUMNS {
                    return Err(FolioError::conversion(
                        self.package.source(),
                        format!("table cell spans {span} columns, more than the {MAX_TABLE_COLUMNS} a table can have"),
                    ));
                }
                cells.extend(std::iter::repeat_n(String::new(), span.saturating_sub(1)));
            }
            table.rows.push((header, cells));
        }
        Ok(table.to_markdown())
    }

    // -----------------------------------------------------------------------
    // Inline content
    // -----------------------------------------------------------------------

    fn render_inline_children(&mut self, parent: Node<'_, '_>) -> Result<String> {
        let mut inlines = Vec::new();
        self.collect_inlines(parent, &mut inlines)?;
        Ok(flatten(inlines))
    }

    fn collect_inlines(&mut self, parent: Node<'_, '_>, out: &mut Vec<Inline>) -> Result<()> {
        for node in parent.children().filter(|n| n.is_element()) {
            match node.tag_name().name() {
                "r" => self.collect_run(node, out)?,
                "hyperlink" => self.collect_hyperlink(node, out)?,
                "bookmarkStart" => {
                    if let Some(name) = attr(node, "name").filter(|n| !n.starts_with('_')) {
                        out.push(Inline::Raw(format!("<a name=\"{name}\"></a>")));
                    }
                }
                "ins" | "smartTag" | "fldSimple" => self.collect_inlines(node, out)?,
                "sdt" => {
                    if let Some(content) = child(node, "sdtContent") {
                        self.collect_inlines(content, out)?;
                    }
                }
                // Deleted tracked changes and paragraph properties carry no text.
                _ => {}
            }
        }
        Ok(())
    }

    fn collect_run(&mut self, r: Node<'_, '_>, out: &mut Vec<Inline>) -> Result<()> {
        let fmt = run_format(r);
        for node in r.children().filter(|n| n.is_element()) {
            self.collect_run_child(node, fmt, out)?;
        }
        Ok(())
    }

    fn collect_run_child(&mut self, node: Node<'_, '_>, fmt: Format, out: &mut Vec<Inline>) -> Result<()> {
        match node.tag_name().name() {
            "t" => {
                if let Some(text) = node.text() {
                    out.push(Inline::Text(escape_text(text), fmt));
                }
            }
            "tab" => out.push(Inline::Text(" ".to_string(), fmt)),
            "noBreakHyphen" => out.push(Inline::Text("-".to_string(), fmt)),
            "br" if attr(node, "type") == Some("page") => {}
            "br" | "cr" => out.push(Inline::Raw("\\\n".to_string())),
            "drawing" => {
                if let Some(image) = self.drawing_image(node)? {
                    out.push(Inline::Raw(image));
                }
            }
            "pict" => {
                if let Some(image) = self.vml_image(node)? {
                    out.push(Inline::Raw(image));
                }
            }
            "AlternateContent" => {
                if let Some(choice) = child(node, "Choice") {
                    for inner in choice.children().filter(|n| n.is_element()) {
                        self.collect_run_child(inner, fmt, out)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn collect_hyperlink(&mut self, link: Node<'_, '_>, out: &mut Vec<Inline>) -> Result<()> {
        let target = attr(link, "id")
            .and_then(|id| self.rels.get(id))
            .map(|rel| rel.target.clone())
            .or_else(|| attr(link, "anchor").map(|a| format!("#{a}")));

        let text = self.render_inline_children(link)?;
        let Some(target) = target else {
            out.push(Inline::Raw(text));
            return Ok(());
        };
        if text.trim().is_empty() {
            return Ok(());
        }

        let rendered = match self.options.link_style {
            LinkStyle::Inline => format!("[{text}]({})", angle_if_spaced(&target)),
            LinkStyle::Reference => {
                let n = self.link_reference(target);
                format!("[{text}][{n}]")
            }
        };
        out.push(Inline::Raw(rendered));
        Ok(())
    }

    fn link_reference(&mut self, url: String) -> usize {
        if let Some(n) = self.link_index.get(&url) {
            return *n;
        }
        self.links.push(url.clone());
        let n = self.links.len();
        self.link_index.insert(url, n);
        n
    }

    // -----------------------------------------------------------------------
    // Images
    // -----------------------------------------------------------------------

    fn drawing_image(&mut self, drawing: Node<'_, '_>) -> Result<Option<String>> {
        let alt = drawing
            .descendants()
            .find(|n| is_element(n, "docPr"))
            .and_then(|n| attr(n, "descr").or_else(|| attr(n, "title")))
            .unwrap_or("");
        let Some(blip) = drawing.descendants().find(|n| is_element(n, "blip")) else {
            return Ok(None);
        };
        let Some(rel_id) = attr(blip, "embed").or_else(|| attr(blip, "link")) else {
            return Ok(None);
        };
        self.image(rel_id, alt)
    }

    fn vml_image(&mut self, pict: Node<'_, '_>) -> Result<Option<String>> {
        let Some(data) = pict.descendants().find(|n| is_element(n, "imagedata")) else {
            return Ok(None);
        };
        let Some(rel_id) = attr(data, "id") else {
            return Ok(None);
        };
        let alt = attr(data, "title").unwrap_or("");
        self.image(rel_id, alt)
    }

    fn image(&mut self, rel_id: &str, alt: &str) -> Result<Option<String>> {
        let Some(rel) = self.rels.get(rel_id).cloned() else {
            debug!(rel_id, "image relationship not found");
            return Ok(None);
        };
        let alt = escape_text(alt);

        if rel.external {
            return Ok(Some(format!("![{alt}]({})", angle_if_spaced(&rel.target))));
        }

        let part = part_name(&rel.target);
        let link = match self.media.get(&part) {
            Some(link) => link.clone(),
            None => match self.extract(&part)? {
                Some(link) => link,
                None => return Ok(None),
            },
        };
        Ok(Some(format!("![{alt}]({})", angle_if_spaced(&link))))
    }

    /// Copy a media part to `<extract_media>/media/<document>/` and remember its link.
    fn extract(&mut self, part: &str) -> Result<Option<String>> {
        self.check_abandoned()?;
        let Some(bytes) = self.package.read_bytes(part)? else {
            debug!(part, "image part missing from package");
            return Ok(None);
        };

        let file_name = Path::new(part)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("image{}", self.media.len() + 1));
        let mut name = file_name.clone();
        let mut n = 1;
        while !self.media_names.insert(name.clone()) {
            n += 1;
            name = format!("{n}-{file_name}");
        }

        let dir = self.media_dir()?;
        let dest = dir.join(&name);
        fs::write(&dest, &bytes).map_err(|e| FolioError::io(&dest, e))?;
        debug!(part, dest = %dest.display(), "extracted media");

        let link = format!(
            "{}/media/{}/{name}",
            self.options.extract_media.display(),
            self.media_folder
        );
        self.media.insert(part.to_string(), link.clone());
        Ok(Some(link))
    }

    /// `<extract_media>/media/<document>`, created on first use.
    ///
    /// `extract_media` itself must already exist. It is deleted when a
    /// conversion is abandoned and must not be recreated afterwards.
    fn media_dir(&self) -> Result<PathBuf> {
        let media = self.options.extract_media.join("media");
        let dir = media.join(&self.media_folder);
        create_leaf_dir(&media)?;
        create_leaf_dir(&dir)?;
        Ok(dir)
    }

    fn check_abandoned(&self) -> Result<()> {
        if self.abandoned.load(Ordering::Relaxed) {
            return Err(FolioError::conversion(self.package.source(), "conversion abandoned"));
        }
        Ok(())
    }
}

/// Base name of the source document, usable as a single path component.
fn media_folder_name(source: &Path) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match derive_base_name(&name) {
        "" | "." | ".." => "document".to_string(),
        base => base.to_string(),
    }
}

/// Create `dir` whose parent must exist.
fn create_leaf_dir(dir: &Path) -> Result<()> {
    match fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(FolioError::io(dir, e)),
    }
}

// ---------------------------------------------------------------------------
// Run and paragraph properties
// ---------------------------------------------------------------------------

fn run_format(r: Node<'_, '_>) -> Format {
    let Some(rpr) = child(r, "rPr") else {
        return Format::default();
    };
    let flag = |name: &str| child(rpr, name).is_some_and(is_on);
    Format {
        bold: flag("b"),
        italic: flag("i"),
        strike: flag("strike") || flag("dstrike"),
    }
}

/// Trim surrounding whitespace and trailing hard breaks.
fn trim_breaks(text: &str) -> String {
    let mut text = text.trim_start();
    while let Some(rest) = text.strip_prefix("\\\n") {
        text = rest.trim_start();
    }
    loop {
        let trimmed = text.trim_end_matches([' ', '\t']);
        match trimmed.strip_suffix("\\\n") {
            Some(rest) => text = rest,
            None => return trimmed.trim_end().to_string(),
        }
    }
}

/// `(numId, ilvl)` when the paragraph is a list item.
fn list_membership(ppr: Node<'_, '_>) -> Option<(String, u8)> {
    let num_pr = child(ppr, "numPr")?;
    let num_id = child_val(num_pr, "numId")?;
    // numId 0 removes numbering inherited from the style.
    if num_id == "0" {
        return None;
    }
    let ilvl = child_val(num_pr, "ilvl")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    Some((num_id.to_string(), ilvl))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOLD: Format = Format { bold: true, italic: false, strike: false };

    #[test]
    fn escapes_markdown_characters() {
        assert_eq!(escape_text("a*b_c [x] <y> `z` \\"), "a\\*b\\_c \\[x\\] \\<y\\> \\`z\\` \\\\");
        assert_eq!(escape_text("a | b ~~c~~"), "a \\| b \\~\\~c\\~\\~");
    }

    #[test]
    fn block_markers_at_line_start_are_escaped() {
        assert_eq!(escape_block_starts("# not a heading"), "\\# not a heading");
        assert_eq!(escape_block_starts("- dash"), "\\- dash");
        assert_eq!(escape_block_starts("+ plus"), "\\+ plus");
        assert_eq!(escape_block_starts("12. twelve"), "12\\. twelve");
        assert_eq!(escape_block_starts("3) three"), "3\\) three");
        assert_eq!(escape_block_starts("first\\\n  # second"), "first\\\n  \\# second");
    }

    #[test]
    fn ordinary_line_starts_are_untouched() {
        assert_eq!(escape_block_starts("2024 was a year"), "2024 was a year");
        assert_eq!(escape_block_starts("a # b - c"), "a # b - c");
        assert_eq!(escape_block_starts("**bold** start"), "**bold** start");
    }

    #[test]
    fn media_folder_is_the_document_base_name() {
        assert_eq!(media_folder_name(Path::new("/in/report.v2.docx")), "report.v2");
        assert_eq!(media_folder_name(Path::new("/in/...docx")), "document");
    }

    #[test]
    fn adjacent_runs_with_same_format_merge() {
        let out = flatten(vec![
            Inline::Text("Hello".into(), BOLD),
            Inline::Text(" world".into(), BOLD),
            Inline::Text(" again".into(), Format::default()),
        ]);
        assert_eq!(out, "**Hello world** again");
    }

    #[test]
    fn whitespace_moves_outside_markers() {
        assert_eq!(wrap_format(" bold ", BOLD), " **bold** ");
        assert_eq!(wrap_format("   ", BOLD), "   ");
    }

    #[test]
    fn combined_formats_nest() {
        let fmt = Format { bold: true, italic: true, strike: true };
        assert_eq!(wrap_format("x", fmt), "~~***x***~~");
    }

    #[test]
    fn hard_breaks_at_paragraph_edges_are_dropped() {
        assert_eq!(trim_breaks("\\\nfirst\\\nsecond\\\n "), "first\\\nsecond");
        assert_eq!(trim_breaks("ends with \\\\"), "ends with \\\\");
    }

    #[test]
    fn list_items_join_tightly() {
        let blocks = vec![
            Block { text: "Intro".into(), list_item: false },
            Block { text: "- a".into(), list_item: true },
            Block { text: "- b".into(), list_item: true },
            Block { text: "Outro".into(), list_item: false },
        ];
        assert_eq!(join_blocks(&blocks), "Intro\n\n- a\n- b\n\nOutro");
    }
}
