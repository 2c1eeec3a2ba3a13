use archiver_core::Article;

const MAX_TITLE_CHARS: usize = 160;
const FALLBACK_TITLE: &str = "article";

/// Archive file name: `{date}-{sanitized title}.md`, or just the title when the date is unknown.
pub fn article_filename(article: &Article) -> String {
    let title = sanitize_title(&article.title);
    match article.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(date) => format!("{}-{title}.md", sanitize_title(date)),
        None => format!("{title}.md"),
    }
}

/// Filesystem-safe title on every platform the archive may be copied to.
pub fn sanitize_title(input: &str) -> String {
    let stripped: String = input
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !is_forbidden(*c))
        .collect();

    // Whitespace runs become one space, dash runs one dash.
    let mut compacted = String::with_capacity(stripped.len());
    let mut previous: Option<char> = None;
    for c in stripped.chars() {
        if (c == ' ' || c == '-') && previous == Some(c) {
            continue;
        }
        compacted.push(c);
        previous = Some(c);
    }

    let mut name: String = compacted
        .trim_matches(&[' ', '.'][..])
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    name = name.trim_end_matches(&[' ', '.'][..]).to_string();
    if name.is_empty() {
        name = FALLBACK_TITLE.to_string();
    }
    if is_reserved_windows_name(&name) {
        name.push('_');
    }
    name
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}' | '\u{7F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let stem = name.split('.').next().unwrap_or(name);
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(stem))
}
