use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric key addressing one document on the remote site.
pub type ArticleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Catch-all collection; every archived article is written here.
    All,
    Macro,
    Industry,
}

impl Category {
    pub const EVERY: [Category; 3] = [Category::All, Category::Macro, Category::Industry];

    /// Stable lowercase key used in configuration files and logs.
    pub fn key(self) -> &'static str {
        match self {
            Category::All => "all",
            Category::Macro => "macro",
            Category::Industry => "industry",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One fetched document, ready to be written to the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub category: Category,
    /// `YYYY.MM.DD` when known.
    pub date: Option<String>,
    pub brief: Option<String>,
    /// Markdown body.
    pub body: String,
    pub source_url: String,
}
