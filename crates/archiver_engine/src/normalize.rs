use ego_tree::NodeRef;
use scraper::node::{Element, Node};
use scraper::Html;
use url::Url;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Re-serialize an HTML fragment with image sources and link targets made absolute.
///
/// Lazy-loaded images carry their real address in `data-src`; it replaces an empty `src`.
pub fn absolutize_fragment(html: &str, base: &Url) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    for child in fragment.root_element().children() {
        write_node(child, base, &mut out);
    }
    out
}

fn write_node(node: NodeRef<'_, Node>, base: &Url, out: &mut String) {
    match node.value() {
        Node::Text(text) => escape_into(text, false, out),
        Node::Element(element) => write_element(node, element, base, out),
        Node::Comment(_) | Node::Doctype(_) | Node::ProcessingInstruction(_) => {}
        _ => {
            for child in node.children() {
                write_node(child, base, out);
            }
        }
    }
}

fn write_element(node: NodeRef<'_, Node>, element: &Element, base: &Url, out: &mut String) {
    let name = element.name();
    out.push('<');
    out.push_str(name);

    let image_source = (name == "img")
        .then(|| {
            element
                .attr("src")
                .filter(|src| !src.trim().is_empty())
                .or_else(|| element.attr("data-src"))
        })
        .flatten();

    for (key, value) in element.attrs() {
        match (name, key) {
            ("img", "src") | ("img", "data-src") => continue,
            ("a", "href") => write_attr(key, &resolve(base, value), out),
            _ => write_attr(key, value, out),
        }
    }
    if let Some(source) = image_source {
        write_attr("src", &resolve(base, source), out);
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }
    for child in node.children() {
        write_node(child, base, out);
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn write_attr(key: &str, value: &str, out: &mut String) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    escape_into(value, true, out);
    out.push('"');
}

/// In-page anchors and script pseudo-links stay as written.
fn resolve(base: &Url, raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') || raw.starts_with("javascript:") {
        return raw.to_string();
    }
    base.join(raw)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
