use archiver_core::{Article, ArticleId};

const IDENTIFIER_PREFIX: &str = "- Identifier:";
/// Header line written by earlier archives of the same site.
const LEGACY_IDENTIFIER_PREFIX: &str = "- 文章ID:";
const RULE: &str = "---";

/// Markdown document for one article: a metadata header, a rule, the optional brief and the body.
pub fn render_document(article: &Article, category_label: &str) -> String {
    let mut out = String::with_capacity(article.body.len() + 256);
    out.push_str(&format!("# {}\n\n", article.title.trim()));
    out.push_str(&format!("- Category: {category_label}\n"));
    out.push_str(&format!(
        "- Date: {}\n",
        article.date.as_deref().unwrap_or("unknown")
    ));
    out.push_str(&format!("{IDENTIFIER_PREFIX} {}\n", article.id));
    out.push_str(&format!("- Source: {}\n\n", article.source_url));
    out.push_str(RULE);
    out.push_str("\n\n");
    if let Some(brief) = article.brief.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        for line in brief.lines() {
            out.push_str(&format!("> {}\n", line.trim()));
        }
        out.push('\n');
    }
    out.push_str(article.body.trim_end());
    out.push('\n');
    out
}

/// Identifier from a document's header block, the lines above the first rule.
pub fn parse_identifier(content: &str) -> Option<ArticleId> {
    content
        .lines()
        .map(str::trim)
        .take_while(|line| *line != RULE)
        .find_map(|line| {
            let value = line
                .strip_prefix(IDENTIFIER_PREFIX)
                .or_else(|| line.strip_prefix(LEGACY_IDENTIFIER_PREFIX))?;
            value.trim().parse::<ArticleId>().ok().filter(|id| *id > 0)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use archiver_core::Category;
    use pretty_assertions::assert_eq;

    fn article() -> Article {
        Article {
            id: 812,
            title: "Steel outlook".to_string(),
            category: Category::Industry,
            date: Some("2024.03.05".to_string()),
            brief: Some("Short take".to_string()),
            body: "## Summary\n\nDemand holds.\n".to_string(),
            source_url: "http://example.com/articles/812".to_string(),
        }
    }

    #[test]
    fn document_layout() {
        assert_eq!(
            render_document(&article(), "行业分析"),
            "# Steel outlook\n\n\
             - Category: 行业分析\n\
             - Date: 2024.03.05\n\
             - Identifier: 812\n\
             - Source: http://example.com/articles/812\n\n\
             ---\n\n\
             > Short take\n\n\
             ## Summary\n\nDemand holds.\n"
        );
    }

    #[test]
    fn unknown_date_and_missing_brief() {
        let mut article = article();
        article.date = None;
        article.brief = None;
        let doc = render_document(&article, "x");
        assert!(doc.contains("- Date: unknown\n"));
        assert!(doc.contains("---\n\n## Summary"));
    }

    #[test]
    fn identifier_round_trips_through_the_header() {
        let doc = render_document(&article(), "行业分析");
        assert_eq!(parse_identifier(&doc), Some(812));
    }

    #[test]
    fn identifier_lines_in_the_body_are_ignored() {
        let doc = "# t\n\n---\n\n- Identifier: 5\n";
        assert_eq!(parse_identifier(doc), None);
        assert_eq!(parse_identifier("# old\n\n- 文章ID: 77\n\n---\n"), Some(77));
        assert_eq!(parse_identifier("- Identifier: zero\n"), None);
    }
}
