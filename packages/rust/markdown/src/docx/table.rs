//! Pipe-table rendering.

/// A table collected from the document, cells already rendered to inline Markdown.
#[derive(Debug, Default)]
pub(crate) struct Table {
    /// `(is_header, cells)` per row.
    pub rows: Vec<(bool, Vec<String>)>,
}

impl Table {
    /// Render as a Markdown pipe table.
    ///
    /// Leading rows flagged as headers become the header; when there are none an
    /// empty header row is emitted so the body keeps every row.
    pub(crate) fn to_markdown(&self) -> String {
        let widths = column_widths(&self.rows);
        if widths.is_empty() {
            return String::new();
        }

        let header_rows = self.rows.iter().take_while(|(h, _)| *h).count().min(1);

        let mut out = String::new();
        if header_rows == 1 {
            out.push_str(&row_to_markdown(&widths, &self.rows[0].1));
        } else {
            out.push_str(&row_to_markdown(&widths, &[]));
        }
        out.push_str(&divider(&widths));
        for (_, cells) in &self.rows[header_rows..] {
            out.push_str(&row_to_markdown(&widths, cells));
        }

        out.trim_end_matches('\n').to_string()
    }
}

/// Widest cell per column, at least 3 so the divider stays valid.
fn column_widths(rows: &[(bool, Vec<String>)]) -> Vec<usize> {
    let columns = rows.iter().map(|(_, r)| r.len()).max().unwrap_or(0);
    let mut widths = vec![3; columns];
    for (_, row) in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    widths
}

fn pad_right(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if width <= len {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - len))
}

fn row_to_markdown(widths: &[usize], row: &[String]) -> String {
    let mut line = String::new();
    for (j, width) in widths.iter().enumerate() {
        let cell = row.get(j).map(String::as_str).unwrap_or("");
        line.push_str(&format!("| {} ", pad_right(cell, *width)));
    }
    line.push_str("|\n");
    line
}

fn divider(widths: &[usize]) -> String {
    let mut line = String::new();
    for width in widths {
        line.push_str(&format!("|{}", "-".repeat(width + 2)));
    }
    line.push_str("|\n");
    line
}

/// Make a rendered cell paragraph safe inside a pipe table.
///
/// Pipes not already escaped get a backslash, hard breaks become `<br/>`
/// and any other newline a space.
pub(crate) fn escape_cell(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\n') => out.push_str("<br/>"),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            },
            '|' => out.push_str("\\|"),
            '\n' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}
