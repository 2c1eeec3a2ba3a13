//! HTML tables as Markdown pipe tables.

use scraper::ElementRef;

use crate::markdown::convert_children;

/// A table flattened to one header row and its data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableModel {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

type Row = Vec<String>;

impl TableModel {
    /// Build the model for `table`, or `None` when it has no cells at all.
    ///
    /// The header is the first `thead` row, else a leading row made only of `th` cells, else the
    /// first row. Data rows repeating the header are dropped and every row is padded or cut to
    /// the header's width.
    pub fn from_element(table: ElementRef<'_>) -> Option<TableModel> {
        let mut head = Vec::new();
        let mut body = Vec::new();
        let mut loose = Vec::new();
        let mut foot = Vec::new();
        let mut has_body = false;

        for section in table.children().filter_map(ElementRef::wrap) {
            match section.value().name() {
                "thead" => head.extend(rows_of(section)),
                "tbody" => {
                    has_body = true;
                    body.extend(rows_of(section));
                }
                "tfoot" => foot.extend(rows_of(section)),
                "tr" => loose.extend(row(section)),
                _ => {}
            }
        }
        if !has_body {
            body = loose;
        }

        let header = if head.is_empty() {
            if body.is_empty() {
                return None;
            }
            // A leading row of `th` cells and a plain first row are promoted alike.
            body.remove(0)
        } else {
            let first = head.remove(0);
            head.append(&mut body);
            body = head;
            first
        };
        body.extend(foot);

        let columns = header.len();
        let rows = body
            .into_iter()
            .filter(|row| *row != header)
            .map(|mut cells| {
                cells.resize(columns, String::new());
                cells
            })
            .collect();
        Some(TableModel { header, rows })
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("\n");
        push_row(&mut out, &self.header);
        push_row(&mut out, &vec!["---".to_string(); self.header.len()]);
        for row in &self.rows {
            push_row(&mut out, row);
        }
        out.push('\n');
        out
    }
}

pub(crate) fn convert_table(table: ElementRef<'_>) -> String {
    TableModel::from_element(table)
        .map(|model| model.to_markdown())
        .unwrap_or_default()
}

fn rows_of(section: ElementRef<'_>) -> Vec<Row> {
    section
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "tr")
        .filter_map(row)
        .collect()
}

fn row(tr: ElementRef<'_>) -> Option<Row> {
    let cells: Vec<ElementRef<'_>> = tr
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
        .collect();
    if cells.is_empty() {
        return None;
    }
    Some(cells.into_iter().map(cell_text).collect())
}

/// Cell content on one line with pipes escaped.
fn cell_text(cell: ElementRef<'_>) -> String {
    convert_children(*cell)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

fn push_row(out: &mut String, cells: &[String]) {
    out.push('|');
    for cell in cells {
        out.push(' ');
        out.push_str(cell);
        out.push_str(" |");
    }
    out.push('\n');
}
