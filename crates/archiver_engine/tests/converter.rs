use archiver_engine::{Converter, StructuralConverter};
use pretty_assertions::assert_eq;

fn md(html: &str) -> String {
    StructuralConverter.to_markdown(html)
}

#[test]
fn heading_paragraph_and_table_keep_their_shape() {
    let html = "<h2>利率</h2><p>本周利率保持稳定。</p>\
                <table><tr><th>银行</th><th>利率</th></tr><tr><td>A</td><td>1.5%</td></tr></table>";
    let markdown = md(html);

    assert_eq!(
        markdown,
        "## 利率\n\n本周利率保持稳定。\n\n| 银行 | 利率 |\n| --- | --- |\n| A | 1.5% |\n"
    );
    let lines: Vec<&str> = markdown.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.iter().filter(|l| l.starts_with('#')).count(), 1);
    assert_eq!(lines.iter().filter(|l| l.starts_with('|')).count(), 3);
}

#[test]
fn headerless_table_promotes_its_first_row() {
    let html = "<table><tr><td>A</td><td>B</td></tr><tr><td>C</td><td>D</td></tr></table>";
    assert_eq!(md(html), "| A | B |\n| --- | --- |\n| C | D |\n");
}

#[test]
fn table_cells_are_single_line_with_pipes_escaped() {
    let html = "<table><thead><tr><th>k</th><th>v</th></tr></thead>\
                <tbody><tr><td>a|b</td><td>line one<br>line two</td></tr></tbody></table>";
    assert_eq!(
        md(html),
        "| k | v |\n| --- | --- |\n| a\\|b | line one line two |\n"
    );
}

#[test]
fn table_between_paragraphs_is_separated_by_blank_lines() {
    let html = "<p>before</p><div><table><tr><td>x</td></tr><tr><td>y</td></tr></table></div><p>after</p>";
    assert_eq!(md(html), "before\n\n| x |\n| --- |\n| y |\n\nafter\n");
}

#[test]
fn empty_table_is_dropped() {
    assert_eq!(md("<p>text</p><table></table>"), "text\n");
}

#[test]
fn empty_input_converts_to_nothing() {
    assert_eq!(md(""), "");
    assert_eq!(md("   \n  "), "");
}

#[test]
fn conversion_is_deterministic() {
    let html = r#"<h3>T</h3><ul><li><b>a</b></li><li><a href="http://x/y">y</a></li></ul>"#;
    let first = md(html);
    let second = md(html);
    assert_eq!(first, second);
    assert_eq!(first, "### T\n\n- **a**\n- [y](http://x/y)\n");
}
