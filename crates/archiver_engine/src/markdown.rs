//! HTML fragment to Markdown.
//!
//! Block elements end in blank lines, inline formatting is kept, and tables become pipe tables
//! (see [`crate::table`]). Runs of blank lines are collapsed when the document is finished.

use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::{ElementRef, Html};

use crate::table;

pub trait Converter: Send + Sync {
    fn to_markdown(&self, html: &str) -> String;
}

/// Tag-by-tag converter over the parsed fragment tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralConverter;

impl Converter for StructuralConverter {
    fn to_markdown(&self, html: &str) -> String {
        let fragment = Html::parse_fragment(html);
        let raw: String = fragment
            .root_element()
            .children()
            .map(convert_node)
            .collect();
        finish(&raw)
    }
}

pub(crate) fn convert_node(node: NodeRef<'_, Node>) -> String {
    match node.value() {
        Node::Text(text) => {
            if text.trim().is_empty() && text.contains('\n') {
                "\n".to_string()
            } else {
                text.to_string()
            }
        }
        Node::Element(_) => ElementRef::wrap(node)
            .map(convert_element)
            .unwrap_or_default(),
        Node::Comment(_) => String::new(),
        _ => convert_children(node),
    }
}

pub(crate) fn convert_children(node: NodeRef<'_, Node>) -> String {
    node.children().map(convert_node).collect()
}

fn convert_element(element: ElementRef<'_>) -> String {
    let tag = element.value().name().to_ascii_lowercase();
    match tag.as_str() {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = usize::from(tag.as_bytes()[1] - b'0');
            let text = inline(element);
            if text.is_empty() {
                String::new()
            } else {
                format!("{} {}\n\n", "#".repeat(level), text)
            }
        }
        "p" => block(inline(element)),
        "ul" | "ol" => list(element),
        "li" => format!("- {}\n", inline(element)),
        "strong" | "b" => wrap_inline(element, "**"),
        "em" | "i" => wrap_inline(element, "*"),
        "a" => {
            let text = inline(element);
            match element.value().attr("href").map(str::trim) {
                Some(href) if !href.is_empty() => {
                    let text = if text.is_empty() { href } else { text.as_str() };
                    format!("[{text}]({href})")
                }
                _ => text,
            }
        }
        "img" => {
            let alt = element.value().attr("alt").unwrap_or("").trim();
            match element.value().attr("src").map(str::trim) {
                Some(src) if !src.is_empty() => format!("![{alt}]({src})"),
                _ => String::new(),
            }
        }
        "br" | "hr" => "\n".to_string(),
        "table" => table::convert_table(element),
        "script" | "style" | "noscript" | "template" | "head" => String::new(),
        _ => convert_children(*element),
    }
}

/// Children rendered and trimmed, for use on a single line.
fn inline(element: ElementRef<'_>) -> String {
    convert_children(*element).trim().to_string()
}

fn wrap_inline(element: ElementRef<'_>, marker: &str) -> String {
    let text = inline(element);
    if text.is_empty() {
        text
    } else {
        format!("{marker}{text}{marker}")
    }
}

fn block(text: String) -> String {
    if text.trim().is_empty() {
        String::new()
    } else {
        format!("{text}\n\n")
    }
}

/// One bullet per direct `li`; items without text are skipped.
fn list(element: ElementRef<'_>) -> String {
    let bullets: Vec<String> = element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name().eq_ignore_ascii_case("li"))
        .map(inline)
        .filter(|text| !text.is_empty())
        .map(|text| format!("- {text}"))
        .collect();
    if bullets.is_empty() {
        String::new()
    } else {
        format!("\n{}\n\n", bullets.join("\n"))
    }
}

/// Trim every line, keep at most one blank line in a row and end with a single newline.
///
/// An input with no visible content yields an empty string.
pub(crate) fn finish(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = true;
    for line in raw.lines().map(str::trim) {
        if line.is_empty() {
            if !blank_run {
                out.push('\n');
            }
            blank_run = true;
        } else {
            out.push_str(line);
            out.push('\n');
            blank_run = false;
        }
    }
    let trimmed = out.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}
