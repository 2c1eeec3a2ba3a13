use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use archiver_core::{ArticleId, Category};
use archiver_engine::{
    visible_text, Archive, ArchiveLayout, ArchiverSettings, FailureKind, FetchError, LoadOrigin,
    Pipeline, PipelineError, RenderedPage, Renderer, Site,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const NOT_FOUND: &str = "<html><body><p>抱歉，找不到页面</p></body></html>";

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(archiver_logging::initialize_for_tests);
}

enum Page {
    Html(String),
    Fail(FailureKind),
}

/// Site scripted per identifier; anything unscripted shows the not-found page.
#[derive(Default)]
struct FakeSite {
    pages: HashMap<ArticleId, Page>,
    calls: RefCell<Vec<ArticleId>>,
}

impl FakeSite {
    fn with_articles(ids: impl IntoIterator<Item = ArticleId>) -> Self {
        let mut site = Self::default();
        for id in ids {
            site.pages.insert(id, Page::Html(article_html(&format!("Title {id}"))));
        }
        site
    }

    fn calls_for(&self, id: ArticleId) -> usize {
        self.calls.borrow().iter().filter(|c| **c == id).count()
    }
}

impl Renderer for FakeSite {
    fn render(&self, url: &str, _timeout: Duration) -> Result<RenderedPage, FetchError> {
        let id: ArticleId = url
            .rsplit('/')
            .next()
            .and_then(|tail| tail.parse().ok())
            .unwrap_or(0);
        self.calls.borrow_mut().push(id);
        let html = match self.pages.get(&id) {
            Some(Page::Html(html)) => html.clone(),
            Some(Page::Fail(kind)) => return Err(FetchError::new(kind.clone(), "scripted")),
            None => NOT_FOUND.to_string(),
        };
        Ok(RenderedPage {
            url: url.to_string(),
            final_url: url.to_string(),
            visible_text: visible_text(&html),
            raw_html: html,
        })
    }
}

fn article_html(title: &str) -> String {
    format!(
        r#"<html><body><div class="article">
             <h1 class="title">{title}</h1>
             <div class="time">2024-03-05</div>
             <div class="content"><p>{}</p></div>
           </div></body></html>"#,
        "市场回顾与展望。".repeat(25)
    )
}

fn settings(root: &Path) -> ArchiverSettings {
    let mut settings = ArchiverSettings::default();
    settings.site = Site::new("http://site.test");
    settings.layout = ArchiveLayout::with_root(root.join("docs"));
    settings.run.sleep_between = Duration::ZERO;
    settings
}

fn md_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".md"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn ids(set: &std::collections::BTreeSet<ArticleId>) -> Vec<ArticleId> {
    set.iter().copied().collect()
}

#[test]
fn first_run_discovers_and_archives_everything() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let settings = settings(temp.path());
    let mut site = FakeSite::with_articles(1..=7);
    site.pages.insert(3, Page::Html(article_html("央行政策点评")));

    let (mut pipeline, startup) = Pipeline::open(settings.clone(), &site).unwrap();
    assert_eq!(startup.origin, LoadOrigin::Fresh);
    let report = pipeline.run_incremental(50).unwrap();

    assert_eq!(report.saved, 7);
    assert_eq!(report.absent + report.unknown + report.failed, 0);
    assert_eq!(report.after.boundary, 7);
    assert_eq!(report.after.next_probe_start, 8);
    assert_eq!(ids(pipeline.ledger().downloaded()), (1..=7).collect::<Vec<_>>());
    assert!(pipeline.ledger().pending().is_empty());

    let layout = &settings.layout;
    assert_eq!(md_files(&layout.category_dir(Category::All)).len(), 7);
    assert_eq!(
        md_files(&layout.category_dir(Category::Macro)),
        vec!["2024.03.05-央行政策点评.md".to_string()]
    );
    assert!(layout.ledger_path().is_file());

    let (archive, startup) = Archive::open(settings).unwrap();
    assert!(startup.repairs.is_empty(), "{:?}", startup.repairs);
    assert_eq!(archive.ledger(), pipeline.ledger());
}

#[test]
fn deleted_files_are_fetched_again() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let settings = settings(temp.path());
    let site = FakeSite::with_articles(1..=4);
    Pipeline::open(settings.clone(), &site)
        .unwrap()
        .0
        .run_incremental(50)
        .unwrap();

    fs::remove_file(
        settings
            .layout
            .category_dir(Category::All)
            .join("2024.03.05-Title 2.md"),
    )
    .unwrap();

    let (mut pipeline, startup) = Pipeline::open(settings, &site).unwrap();
    assert!(!pipeline.ledger().is_downloaded(2));
    assert!(!startup.repairs.is_empty());

    let report = pipeline.run_incremental(50).unwrap();
    assert_eq!(report.saved, 1);
    assert!(pipeline.ledger().is_downloaded(2));
}

#[test]
fn absent_and_unresolved_ids_are_kept_apart() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let mut site = FakeSite::with_articles([1, 4]);
    site.pages.insert(2, Page::Fail(FailureKind::Timeout));

    let (mut pipeline, _) = Pipeline::open(settings(temp.path()), &site).unwrap();
    let report = pipeline.run_incremental(50).unwrap();

    assert_eq!(report.saved, 2);
    assert_eq!(report.absent, 1);
    assert_eq!(report.unknown, 1);
    let ledger = pipeline.ledger();
    assert_eq!(ledger.boundary(), 4);
    assert_eq!(ids(ledger.missing()), vec![3]);
    assert_eq!(ids(ledger.pending()), vec![2]);
    assert!(!ledger.saved().contains(&2));
    // Twice while probing, twice on the full fetch.
    assert_eq!(site.calls_for(2), 4);
}

#[test]
fn pending_ids_are_retried_first() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let settings = settings(temp.path());
    let mut flaky = FakeSite::with_articles([1, 3]);
    flaky.pages.insert(2, Page::Fail(FailureKind::HttpStatus(503)));
    Pipeline::open(settings.clone(), &flaky)
        .unwrap()
        .0
        .run_incremental(50)
        .unwrap();

    let healed = FakeSite::with_articles(1..=3);
    let (mut pipeline, _) = Pipeline::open(settings, &healed).unwrap();
    assert_eq!(ids(pipeline.ledger().pending()), vec![2]);

    let report = pipeline.run_incremental(50).unwrap();
    assert_eq!(report.saved, 1);
    assert_eq!(healed.calls.borrow().first(), Some(&2));
    assert!(pipeline.ledger().pending().is_empty());
}

#[test]
fn pending_id_is_loaded_once_per_run() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let settings = settings(temp.path());
    let mut site = FakeSite::with_articles([1, 3]);
    site.pages.insert(2, Page::Fail(FailureKind::Timeout));
    Pipeline::open(settings.clone(), &site)
        .unwrap()
        .0
        .run_incremental(50)
        .unwrap();
    site.calls.borrow_mut().clear();

    let (mut pipeline, _) = Pipeline::open(settings, &site).unwrap();
    let report = pipeline.run_incremental(50).unwrap();

    // One load plus its transient retry, nothing from the boundary scan or the fetch plan.
    assert_eq!(site.calls_for(2), 2);
    assert_eq!(report.unknown, 1);
    assert_eq!(ids(pipeline.ledger().pending()), vec![2]);
    assert_eq!(pipeline.ledger().boundary(), 3);
}

#[test]
fn articles_sharing_date_and_title_settle_after_one_run() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let settings = settings(temp.path());
    let mut site = FakeSite::default();
    site.pages.insert(1, Page::Html(article_html("晨会纪要")));
    site.pages.insert(2, Page::Html(article_html("晨会纪要")));

    let (mut pipeline, _) = Pipeline::open(settings.clone(), &site).unwrap();
    assert_eq!(pipeline.run_incremental(50).unwrap().saved, 2);
    let files = md_files(&settings.layout.category_dir(Category::All));
    assert_eq!(files.len(), 2);
    assert!(files.contains(&"2024.03.05-晨会纪要.md".to_string()), "{files:?}");

    let (mut pipeline, startup) = Pipeline::open(settings, &site).unwrap();
    assert!(startup.repairs.is_empty(), "{:?}", startup.repairs);
    assert_eq!(ids(pipeline.ledger().downloaded()), vec![1, 2]);
    let report = pipeline.run_incremental(50).unwrap();
    assert_eq!(report.saved, 0);
}

#[test]
fn batch_size_bounds_the_fetches() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let site = FakeSite::with_articles(1..=10);
    let (mut pipeline, _) = Pipeline::open(settings(temp.path()), &site).unwrap();

    let report = pipeline.run_incremental(3).unwrap();

    assert_eq!(report.saved, 3);
    assert_eq!(ids(pipeline.ledger().downloaded()), vec![1, 2, 3]);
    assert_eq!(pipeline.ledger().pending().len(), 7);
}

#[test]
fn manual_range_stops_after_consecutive_misses() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let site = FakeSite::with_articles(1..=5);
    let (mut pipeline, _) = Pipeline::open(settings(temp.path()), &site).unwrap();

    let report = pipeline.run_manual(3, 20, 4).unwrap();

    assert_eq!(report.saved, 3);
    assert_eq!(report.absent, 4);
    let ledger = pipeline.ledger();
    assert_eq!(ids(ledger.downloaded()), vec![3, 4, 5]);
    assert_eq!(ledger.boundary(), 5);
    assert_eq!(ledger.next_probe_start(), 10);
    let run = report.probe.unwrap();
    assert_eq!((run.start, run.stop, run.found), (3, 9, 5));
    assert_eq!(site.calls_for(10), 0);
}

#[test]
fn manual_range_rejects_empty_ranges() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let site = FakeSite::default();
    let (mut pipeline, _) = Pipeline::open(settings(temp.path()), &site).unwrap();

    assert!(matches!(
        pipeline.run_manual(9, 3, 5),
        Err(PipelineError::InvalidRange { start: 9, end: 3 })
    ));
    assert!(matches!(
        pipeline.run_manual(0, 3, 5),
        Err(PipelineError::InvalidRange { .. })
    ));
}

#[test]
fn failed_category_copy_leaves_the_id_pending() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let settings = settings(temp.path());
    let mut site = FakeSite::default();
    site.pages.insert(1, Page::Html(article_html("宏观经济周报")));
    fs::create_dir_all(&settings.layout.root).unwrap();
    fs::write(settings.layout.category_dir(Category::Macro), "not a directory").unwrap();

    let (mut pipeline, _) = Pipeline::open(settings.clone(), &site).unwrap();
    let report = pipeline.run_manual(1, 1, 1).unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(ids(pipeline.ledger().pending()), vec![1]);
    assert_eq!(md_files(&settings.layout.category_dir(Category::All)).len(), 1);
}

#[test]
fn corrupt_ledger_is_moved_aside_and_rebuilt_from_files() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let settings = settings(temp.path());
    let site = FakeSite::with_articles(1..=2);
    Pipeline::open(settings.clone(), &site)
        .unwrap()
        .0
        .run_incremental(50)
        .unwrap();
    let ledger_path = settings.layout.ledger_path();
    fs::write(&ledger_path, "{ not json").unwrap();

    let (archive, startup) = Archive::open(settings.clone()).unwrap();

    assert!(startup.recovered_from_corruption());
    let LoadOrigin::Recovered { backup } = &startup.origin else {
        panic!("expected recovery, got {:?}", startup.origin);
    };
    assert_eq!(fs::read_to_string(backup).unwrap(), "{ not json");
    assert!(backup
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("index.json.corrupt-"));
    assert_eq!(ids(archive.ledger().downloaded()), vec![1, 2]);
    let persisted: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&ledger_path).unwrap()).unwrap();
    assert_eq!(persisted["downloaded_ids"], serde_json::json!([1, 2]));
}

#[test]
fn raw_html_snapshots_are_kept_when_asked() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let mut settings = settings(temp.path());
    let raw = temp.path().join("raw_html");
    settings.run.raw_html_dir = Some(raw.clone());
    let site = FakeSite::with_articles([1]);

    let (pipeline, _) = Pipeline::open(settings, &site).unwrap();
    let outcome = pipeline.fetch_article(1);

    assert!(matches!(outcome, archiver_engine::FetchOutcome::Found(_)));
    let kept = fs::read_to_string(raw.join("article_1.html")).unwrap();
    assert!(kept.contains("Title 1"));
}

#[test]
fn stats_reflect_archive_and_ledger() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let settings = settings(temp.path());
    let mut site = FakeSite::with_articles(1..=3);
    site.pages.insert(2, Page::Html(article_html("光伏板块周报")));
    Pipeline::open(settings.clone(), &site)
        .unwrap()
        .0
        .run_incremental(50)
        .unwrap();

    let (archive, _) = Archive::open(settings.clone()).unwrap();
    let (path, stats) = archive.write_stats().unwrap();

    assert_eq!(path, settings.layout.stats_path());
    assert_eq!(stats.total_articles, 3);
    assert_eq!(stats.categories["行业分析"], 1);
    assert_eq!(stats.categories["宏观分析"], 0);
    assert_eq!(stats.index.downloaded_total, 3);
    assert!(stats.last_update.is_some());
}
