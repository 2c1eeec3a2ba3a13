use std::time::Duration;

use archiver_logging::{archiver_debug, archiver_trace};
use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::Html;

use crate::fetch::{FetchSettings, Fetcher, ReqwestFetcher};
use crate::{decode_html, FailureKind, FetchError, RenderedPage};

/// Loads a page and hands back what a reader would see once it settled.
///
/// Implementations block the calling thread; the pipeline is strictly sequential.
pub trait Renderer {
    fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, FetchError>;
}

impl<R: Renderer + ?Sized> Renderer for &R {
    fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, FetchError> {
        (**self).render(url, timeout)
    }
}

/// Renderer backed by a plain HTTP fetch on a private single-threaded runtime.
pub struct HttpRenderer<F: Fetcher = ReqwestFetcher> {
    fetcher: F,
    runtime: tokio::runtime::Runtime,
    settle_delay: Duration,
}

impl HttpRenderer<ReqwestFetcher> {
    /// Acquire the HTTP client and runtime. Failing here means no page can be loaded at all.
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let settle_delay = settings.settle_delay;
        let fetcher = ReqwestFetcher::new(settings)?;
        Self::with_fetcher(fetcher, settle_delay)
    }
}

impl<F: Fetcher> HttpRenderer<F> {
    pub fn with_fetcher(fetcher: F, settle_delay: Duration) -> Result<Self, FetchError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            fetcher,
            runtime,
            settle_delay,
        })
    }
}

impl<F: Fetcher> Renderer for HttpRenderer<F> {
    fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, FetchError> {
        archiver_trace!("rendering {}", url);
        let output = self.runtime.block_on(async {
            let output = tokio::time::timeout(timeout, self.fetcher.fetch(url))
                .await
                .map_err(|_| {
                    FetchError::new(FailureKind::Timeout, format!("no response within {timeout:?}"))
                })??;
            tokio::time::sleep(self.settle_delay).await;
            Ok::<_, FetchError>(output)
        })?;

        let decoded = decode_html(&output.bytes, output.metadata.content_type.as_deref())
            .map_err(|err| FetchError::new(FailureKind::Decode, err.to_string()))?;
        archiver_debug!(
            "{} -> {} ({} bytes, {})",
            url,
            output.metadata.final_url,
            output.metadata.byte_len,
            decoded.encoding_label
        );

        Ok(RenderedPage {
            url: output.metadata.original_url,
            final_url: output.metadata.final_url,
            visible_text: visible_text(&decoded.html),
            raw_html: decoded.html,
        })
    }
}

/// Text a reader would see: every text node outside head, script and style blocks, one
/// non-empty run per line.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();
    collect_text(*document.root_element(), &mut lines);
    lines.join("\n")
}

fn collect_text<'a>(node: NodeRef<'a, Node>, lines: &mut Vec<&'a str>) {
    match node.value() {
        Node::Text(text) => {
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        Node::Element(element) => {
            if matches!(
                element.name(),
                "head" | "script" | "style" | "noscript" | "template"
            ) {
                return;
            }
            for child in node.children() {
                collect_text(child, lines);
            }
        }
        _ => {
            for child in node.children() {
                collect_text(child, lines);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_text_skips_head_and_scripts() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><p> one </p><script>var x;</script><div>two<span>three</span></div></body></html>";
        assert_eq!(visible_text(html), "one\ntwo\nthree");
    }

    #[test]
    fn visible_text_of_empty_body_is_empty() {
        assert_eq!(visible_text("<html><body>  \n </body></html>"), "");
    }
}
