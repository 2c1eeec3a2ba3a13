use std::time::Duration;

use archiver_engine::{
    FailureKind, FetchSettings, Fetcher, HttpRenderer, Renderer, ReqwestFetcher,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn quick_settings() -> FetchSettings {
    FetchSettings {
        settle_delay: Duration::ZERO,
        ..FetchSettings::default()
    }
}

#[tokio::test]
async fn fetcher_returns_html_and_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/articles/1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>ok</html>", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(quick_settings()).unwrap();
    let url = format!("{}/articles/1", server.uri());

    let output = fetcher.fetch(&url).await.expect("fetch ok");
    assert_eq!(output.metadata.original_url, url);
    assert_eq!(output.metadata.final_url, url);
    assert_eq!(output.metadata.byte_len, 15);
    assert!(output
        .metadata
        .content_type
        .unwrap()
        .starts_with("text/html"));
    assert_eq!(output.bytes, b"<html>ok</html>");
}

#[tokio::test]
async fn fetcher_fails_on_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/articles/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(quick_settings()).unwrap();
    let url = format!("{}/articles/404", server.uri());

    let err = fetcher.fetch(&url).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(404));
    assert!(err.kind.is_not_found());
}

#[tokio::test]
async fn fetcher_rejects_unsupported_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("%PDF", "application/pdf"))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(quick_settings()).unwrap();
    let err = fetcher
        .fetch(&format!("{}/report.pdf", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::UnsupportedContentType {
            content_type: "application/pdf".to_string()
        }
    );
}

#[tokio::test]
async fn fetcher_rejects_too_large_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/large"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html")
                .set_body_string("01234567890"),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        max_bytes: 10,
        ..quick_settings()
    };
    let fetcher = ReqwestFetcher::new(settings).unwrap();
    let url = format!("{}/large", server.uri());

    let err = fetcher.fetch(&url).await.unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::TooLarge {
            max_bytes: 10,
            actual: Some(11)
        }
    );
}

#[tokio::test]
async fn invalid_url_is_rejected_before_any_request() {
    let fetcher = ReqwestFetcher::new(quick_settings()).unwrap();
    let err = fetcher.fetch("not a url").await.unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidUrl);
}

/// The renderer blocks on its own runtime, so the mock server lives on a separate one.
fn serve(route: &'static str, template: ResponseTemplate) -> (tokio::runtime::Runtime, MockServer) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    });
    (runtime, server)
}

#[test]
fn renderer_decodes_page_and_extracts_visible_text() {
    let html = "<html><head><title>t</title><script>var x = 1;</script></head>\
                <body><h1>标题</h1><p>第一段</p><style>p{}</style><p>第二段</p></body></html>";
    let (_runtime, server) = serve(
        "/articles/7",
        ResponseTemplate::new(200).set_body_raw(html, "text/html; charset=utf-8"),
    );
    let renderer = HttpRenderer::new(quick_settings()).unwrap();
    let url = format!("{}/articles/7", server.uri());

    let page = renderer.render(&url, Duration::from_secs(5)).unwrap();

    assert_eq!(page.url, url);
    assert_eq!(page.visible_text, "标题\n第一段\n第二段");
    assert!(page.raw_html.contains("<p>第一段</p>"));
}

#[test]
fn renderer_gives_up_after_the_page_timeout() {
    let (_runtime, server) = serve(
        "/slow",
        ResponseTemplate::new(200)
            .set_delay(Duration::from_millis(500))
            .set_body_raw("<p>late</p>", "text/html"),
    );
    let renderer = HttpRenderer::new(quick_settings()).unwrap();

    let err = renderer
        .render(&format!("{}/slow", server.uri()), Duration::from_millis(50))
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Timeout);
    assert!(err.kind.is_transient());
}
