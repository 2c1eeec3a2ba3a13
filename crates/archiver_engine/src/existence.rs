use std::time::Duration;

use archiver_core::{ArticleId, Existence, ExistenceCheck};
use archiver_logging::{archiver_debug, archiver_warn};
use serde::{Deserialize, Serialize};

use crate::{FetchError, RenderedPage, Renderer, Site};

/// Decides from a page's visible text whether a document exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExistencePolicy {
    /// Visible text at least this long (in characters) means the document exists.
    pub min_present_chars: usize,
    /// Site boilerplate shown on every page, including empty ones.
    pub disclaimer: String,
    /// Characters besides the disclaimer an empty page may still show.
    pub disclaimer_slack: usize,
    /// Phrases the site shows instead of a missing document.
    pub not_found_markers: Vec<String>,
}

impl Default for ExistencePolicy {
    fn default() -> Self {
        Self {
            min_present_chars: 150,
            disclaimer: "本站内容仅供参考，不构成任何投资建议".to_string(),
            disclaimer_slack: 20,
            not_found_markers: vec!["找不到页面".to_string(), "页面不存在".to_string()],
        }
    }
}

impl ExistencePolicy {
    pub fn classify(&self, visible_text: &str) -> Existence {
        let text = visible_text.trim();
        if text.chars().count() >= self.min_present_chars {
            return Existence::Present;
        }
        if self.shows_not_found(text) || self.is_disclaimer_only(text) {
            return Existence::Absent;
        }
        Existence::Unknown
    }

    /// Outcome of a page load, a failed load included.
    pub fn classify_load(&self, load: &Result<RenderedPage, FetchError>) -> Existence {
        match load {
            Ok(page) => self.classify(&page.visible_text),
            Err(err) if err.kind.is_not_found() => Existence::Absent,
            Err(_) => Existence::Unknown,
        }
    }

    fn shows_not_found(&self, text: &str) -> bool {
        self.not_found_markers
            .iter()
            .any(|marker| !marker.is_empty() && text.contains(marker.as_str()))
    }

    /// Whitespace is ignored on both sides of the comparison.
    fn is_disclaimer_only(&self, text: &str) -> bool {
        let disclaimer = squeeze(&self.disclaimer);
        if disclaimer.is_empty() {
            return text.chars().count() <= self.disclaimer_slack;
        }
        let remainder = squeeze(text).replace(&disclaimer, "");
        remainder.chars().count() <= self.disclaimer_slack
    }
}

fn squeeze(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Existence oracle that loads the article page for each identifier.
pub struct PageProbe<'a, R: Renderer + ?Sized> {
    renderer: &'a R,
    site: &'a Site,
    policy: &'a ExistencePolicy,
    timeout: Duration,
}

impl<'a, R: Renderer + ?Sized> PageProbe<'a, R> {
    pub fn new(
        renderer: &'a R,
        site: &'a Site,
        policy: &'a ExistencePolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            site,
            policy,
            timeout,
        }
    }
}

impl<R: Renderer + ?Sized> ExistenceCheck for PageProbe<'_, R> {
    fn check(&mut self, id: ArticleId) -> Existence {
        let url = self.site.article_url(id);
        let load = self.renderer.render(&url, self.timeout);
        if let Err(err) = &load {
            if !err.kind.is_not_found() {
                archiver_warn!("probe of {} failed: {}", id, err);
            }
        }
        let existence = self.policy.classify_load(&load);
        archiver_debug!("probe {} -> {:?}", id, existence);
        existence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    fn policy() -> ExistencePolicy {
        ExistencePolicy {
            disclaimer: "Content is for reference only.".to_string(),
            ..ExistencePolicy::default()
        }
    }

    #[test]
    fn long_text_is_present() {
        assert_eq!(policy().classify(&"x".repeat(150)), Existence::Present);
        assert_eq!(policy().classify(&"研".repeat(150)), Existence::Present);
    }

    #[test]
    fn disclaimer_alone_is_absent() {
        let text = "  Content is for reference only. \n 2024 ";
        assert_eq!(policy().classify(text), Existence::Absent);
        assert_eq!(policy().classify(""), Existence::Absent);
    }

    #[test]
    fn not_found_marker_is_absent() {
        assert_eq!(policy().classify("抱歉，找不到页面"), Existence::Absent);
    }

    #[test]
    fn short_unrelated_text_is_unknown() {
        let text = "Loading the latest market commentary, please wait a moment";
        assert_eq!(policy().classify(text), Existence::Unknown);
    }

    #[test]
    fn failed_loads_map_by_status() {
        let policy = policy();
        let gone = Err(FetchError::new(FailureKind::HttpStatus(410), "gone"));
        let busy = Err(FetchError::new(FailureKind::HttpStatus(503), "busy"));
        let slow = Err(FetchError::new(FailureKind::Timeout, "slow"));
        assert_eq!(policy.classify_load(&gone), Existence::Absent);
        assert_eq!(policy.classify_load(&busy), Existence::Unknown);
        assert_eq!(policy.classify_load(&slow), Existence::Unknown);
    }
}
