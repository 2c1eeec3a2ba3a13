use archiver_core::ArticleId;
use serde::{Deserialize, Serialize};
use url::Url;

/// Where article pages live: `{base_url}/{article_path}/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Site {
    pub base_url: String,
    pub article_path: String,
}

impl Default for Site {
    fn default() -> Self {
        Self {
            base_url: "http://h5.2025eyp.com".to_string(),
            article_path: "articles".to_string(),
        }
    }
}

impl Site {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// The base URL as a directory, so relative paths resolve below it.
    pub fn root_url(&self) -> Option<Url> {
        Url::parse(&format!("{}/", self.base_url.trim_end_matches('/'))).ok()
    }

    pub fn article_url(&self, id: ArticleId) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.article_path.trim_matches('/');
        if path.is_empty() {
            format!("{base}/{id}")
        } else {
            format!("{base}/{path}/{id}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_urls_tolerate_stray_slashes() {
        let site = Site {
            base_url: "http://example.com/".to_string(),
            article_path: "/articles/".to_string(),
        };
        assert_eq!(site.article_url(42), "http://example.com/articles/42");
        assert_eq!(Site::new("http://a.b").article_url(7), "http://a.b/articles/7");
    }

    #[test]
    fn root_url_keeps_a_base_path() {
        let root = Site::new("http://example.com/mirror").root_url().unwrap();
        assert_eq!(root.join("img/a.png").unwrap().as_str(), "http://example.com/mirror/img/a.png");
        let bare = Site::new("http://example.com/").root_url().unwrap();
        assert_eq!(bare.as_str(), "http://example.com/");
    }
}
