use std::sync::LazyLock;

use archiver_core::{Article, ArticleId, Category};
use archiver_logging::archiver_debug;
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{absolutize_fragment, Converter, RenderedPage, Site, StructuralConverter};

static DATE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d{4})[./\-](\d{1,2})[./\-](\d{1,2})").ok());

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Ordered CSS selector lists; the first selector that matches wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractSettings {
    pub title: Vec<String>,
    pub category: Vec<String>,
    pub date: Vec<String>,
    pub brief: Vec<String>,
    pub body: Vec<String>,
    /// Containers whose plain text stands in for a body that converted to too little.
    pub fallback_text: Vec<String>,
    pub min_body_chars: usize,
    /// Leading body characters consulted by category keyword matching.
    pub category_preview_chars: usize,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            title: strings(&[".article .title", ".article-title", "article h1", "h1"]),
            category: strings(&[".article .tags", ".article .category", ".article .cate"]),
            date: strings(&[".article .time", ".article .date", "time"]),
            brief: strings(&[".article .brief", ".article .summary"]),
            body: strings(&[
                ".article .md-editor-preview",
                ".article .content",
                ".article-content",
                "article",
            ]),
            fallback_text: strings(&[".article", "body"]),
            min_body_chars: 40,
            category_preview_chars: 200,
        }
    }
}

/// Category labels as shown on the site and the keywords that imply each topical category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryRules {
    pub all_label: String,
    pub macro_label: String,
    pub industry_label: String,
    pub macro_keywords: Vec<String>,
    pub industry_keywords: Vec<String>,
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self {
            all_label: "全部研报".to_string(),
            macro_label: "宏观分析".to_string(),
            industry_label: "行业分析".to_string(),
            macro_keywords: strings(&["宏观", "政策", "经济", "大势", "央行"]),
            industry_keywords: strings(&["行业", "产业", "板块", "赛道", "公司", "分析", "专题", "研究"]),
        }
    }
}

impl CategoryRules {
    pub fn label(&self, category: Category) -> &str {
        match category {
            Category::All => &self.all_label,
            Category::Macro => &self.macro_label,
            Category::Industry => &self.industry_label,
        }
    }

    /// Category whose label or key is exactly `tag`.
    pub fn from_label(&self, tag: &str) -> Option<Category> {
        let tag = tag.trim();
        Category::EVERY
            .into_iter()
            .find(|c| self.label(*c) == tag || c.key().eq_ignore_ascii_case(tag))
    }

    /// An explicit site tag wins; otherwise macro keywords are tried before industry keywords.
    pub fn detect(&self, explicit: Option<&str>, title: &str, preview: &str) -> Category {
        if let Some(category) = explicit.and_then(|tag| self.from_label(tag)) {
            return category;
        }
        let haystack = format!("{} {} {}", explicit.unwrap_or(""), title, preview);
        let hit = |keywords: &[String]| {
            keywords
                .iter()
                .any(|k| !k.is_empty() && haystack.contains(k.as_str()))
        };
        if hit(self.macro_keywords.as_slice()) {
            Category::Macro
        } else if hit(self.industry_keywords.as_slice()) {
            Category::Industry
        } else {
            Category::All
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
}

struct Selectors {
    title: Vec<Selector>,
    category: Vec<Selector>,
    date: Vec<Selector>,
    brief: Vec<Selector>,
    body: Vec<Selector>,
    fallback_text: Vec<Selector>,
}

fn compile(list: &[String]) -> Result<Vec<Selector>, ExtractError> {
    list.iter()
        .map(|selector| {
            Selector::parse(selector).map_err(|err| ExtractError::InvalidSelector {
                selector: selector.clone(),
                message: err.to_string(),
            })
        })
        .collect()
}

/// Turns a rendered article page into an [`Article`].
///
/// Relative image and link addresses in the body resolve against the site root.
pub struct ArticleExtractor<C: Converter = StructuralConverter> {
    settings: ExtractSettings,
    categories: CategoryRules,
    selectors: Selectors,
    base: Option<Url>,
    converter: C,
}

impl ArticleExtractor<StructuralConverter> {
    pub fn new(
        settings: ExtractSettings,
        categories: CategoryRules,
        site: &Site,
    ) -> Result<Self, ExtractError> {
        Self::with_converter(settings, categories, site, StructuralConverter)
    }
}

impl<C: Converter> ArticleExtractor<C> {
    pub fn with_converter(
        settings: ExtractSettings,
        categories: CategoryRules,
        site: &Site,
        converter: C,
    ) -> Result<Self, ExtractError> {
        let selectors = Selectors {
            title: compile(&settings.title)?,
            category: compile(&settings.category)?,
            date: compile(&settings.date)?,
            brief: compile(&settings.brief)?,
            body: compile(&settings.body)?,
            fallback_text: compile(&settings.fallback_text)?,
        };
        Ok(Self {
            settings,
            categories,
            selectors,
            base: site.root_url(),
            converter,
        })
    }

    /// `None` when the page carries no usable body: neither the converted body nor the
    /// fallback text reaches the minimum length.
    pub fn extract(&self, id: ArticleId, page: &RenderedPage) -> Option<Article> {
        let document = Html::parse_document(&page.raw_html);

        let title = first_text(&document, &self.selectors.title, " ")
            .unwrap_or_else(|| format!("article_{id}"));
        let explicit_category = first_text(&document, &self.selectors.category, " ");
        let date_text = first_text(&document, &self.selectors.date, " ");
        let brief = first_text(&document, &self.selectors.brief, " ");

        let body = self.body_markdown(&document, page).or_else(|| {
            first_text(&document, &self.selectors.fallback_text, "\n")
                .filter(|text| char_len(text) >= self.settings.min_body_chars)
                .map(|text| format!("{text}\n"))
        });
        let Some(body) = body else {
            archiver_debug!("article {}: no usable body at {}", id, page.final_url);
            return None;
        };

        let preview: String = body
            .chars()
            .take(self.settings.category_preview_chars)
            .collect();
        let category = self
            .categories
            .detect(explicit_category.as_deref(), &title, &preview);
        let date = date_text
            .as_deref()
            .and_then(find_date)
            .or_else(|| find_date(&body));

        Some(Article {
            id,
            title,
            category,
            date,
            brief,
            body,
            source_url: page.url.clone(),
        })
    }

    fn body_markdown(&self, document: &Html, page: &RenderedPage) -> Option<String> {
        let html = first_match(document, &self.selectors.body)
            .map(|element| element.inner_html())
            .filter(|html| !html.trim().is_empty())?;
        let base = self
            .base
            .clone()
            .or_else(|| Url::parse(&page.final_url).ok())
            .or_else(|| Url::parse(&page.url).ok());
        let html = match base {
            Some(base) => absolutize_fragment(&html, &base),
            None => html,
        };
        let markdown = self.converter.to_markdown(&html);
        (char_len(markdown.trim()) >= self.settings.min_body_chars).then_some(markdown)
    }
}

fn first_match<'a>(document: &'a Html, selectors: &[Selector]) -> Option<ElementRef<'a>> {
    selectors
        .iter()
        .find_map(|selector| document.select(selector).next())
}

/// Text of the first matching element that has any, trimmed runs joined by `separator`.
fn first_text(document: &Html, selectors: &[Selector], separator: &str) -> Option<String> {
    selectors.iter().find_map(|selector| {
        let element = document.select(selector).next()?;
        let text = element
            .text()
            .map(str::trim)
            .filter(|run| !run.is_empty())
            .collect::<Vec<_>>()
            .join(separator);
        (!text.is_empty()).then_some(text)
    })
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// First valid calendar date in `text`, formatted `YYYY.MM.DD`.
pub fn find_date(text: &str) -> Option<String> {
    let pattern = DATE_PATTERN.as_ref()?;
    pattern.captures_iter(text).find_map(|captures| {
        let year = captures.get(1)?.as_str().parse().ok()?;
        let month = captures.get(2)?.as_str().parse().ok()?;
        let day = captures.get(3)?.as_str().parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day).map(|date| date.format("%Y.%m.%d").to_string())
    })
}
