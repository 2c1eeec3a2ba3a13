//! One archiver run: ledger load and repair, boundary probe, fetch and archive.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use archiver_core::{
    diagnose, probe, reconcile, ArticleId, Diagnosis, Existence, ExistenceCheck, FilesystemScan, Ledger,
    LedgerSummary, ProbeRun, Repair,
};
use archiver_logging::{archiver_debug, archiver_error, archiver_info, archiver_warn};

use crate::{
    ArchiveStats, ArchiveWriter, ArchiverSettings, ArticleExtractor, AtomicFileWriter,
    ExtractError, FailureKind, FetchError, FetchOutcome, LedgerStore, LoadOrigin, PageProbe,
    PersistError, RenderedPage, Renderer, StoreError,
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to scan the archive: {0}")]
    Scan(#[from] PersistError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("invalid id range {start}..={end}")]
    InvalidRange { start: ArticleId, end: ArticleId },
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// What happened while the archive was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub origin: LoadOrigin,
    pub repairs: Vec<Repair>,
    /// Whether the ledger file was rewritten.
    pub persisted: bool,
}

impl StartupReport {
    pub fn recovered_from_corruption(&self) -> bool {
        matches!(self.origin, LoadOrigin::Recovered { .. })
    }
}

/// The archive directories together with their reconciled ledger.
pub struct Archive {
    settings: ArchiverSettings,
    store: LedgerStore,
    writer: ArchiveWriter,
    ledger: Ledger,
}

impl Archive {
    /// Load the ledger (recovering from corruption), scan the archive, reconcile and persist
    /// when anything changed.
    pub fn open(settings: ArchiverSettings) -> Result<(Self, StartupReport), PipelineError> {
        let store = LedgerStore::new(settings.layout.ledger_path());
        let writer = ArchiveWriter::new(settings.layout.clone(), settings.categories.clone());

        let loaded = store.load(now_ts())?;
        let scan = writer.scan()?;
        let reconciled = reconcile(loaded.ledger, &scan, &settings.limits);

        let mut repairs = loaded.repairs;
        repairs.extend(reconciled.repairs);
        let persisted = loaded.origin == LoadOrigin::Fresh || !repairs.is_empty();
        if persisted {
            store.save(&reconciled.ledger)?;
        }
        archiver_info!(
            "archive opened at {:?}: {} files, {} repairs",
            settings.layout.root,
            scan.files.len(),
            repairs.len()
        );

        let archive = Self {
            settings,
            store,
            writer,
            ledger: reconciled.ledger,
        };
        let report = StartupReport {
            origin: loaded.origin,
            repairs,
            persisted,
        };
        Ok((archive, report))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn settings(&self) -> &ArchiverSettings {
        &self.settings
    }

    pub fn scan(&self) -> Result<FilesystemScan, PipelineError> {
        Ok(self.writer.scan()?)
    }

    /// Recompute and publish archive statistics.
    pub fn write_stats(&self) -> Result<(PathBuf, ArchiveStats), PipelineError> {
        let scan = self.scan()?;
        let stats = ArchiveStats::collect(
            &self.settings.layout,
            &self.settings.categories,
            &scan,
            &self.ledger,
        );
        let path = stats.write(&self.settings.layout)?;
        Ok((path, stats))
    }

    fn persist(&self) -> Result<(), PipelineError> {
        Ok(self.store.save(&self.ledger)?)
    }
}

/// Read-only health report: nothing is written, a corrupt ledger is an error.
pub fn diagnose_archive(settings: &ArchiverSettings) -> Result<(Diagnosis, LedgerSummary), PipelineError> {
    let store = LedgerStore::new(settings.layout.ledger_path());
    let ledger = store.read()?.map(|(ledger, _)| ledger).unwrap_or_default();
    let writer = ArchiveWriter::new(settings.layout.clone(), settings.categories.clone());
    let scan = writer.scan()?;
    Ok((diagnose(&ledger, &scan), ledger.summary()))
}

/// Counters and ledger snapshots for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub before: LedgerSummary,
    pub after: LedgerSummary,
    pub probe: Option<ProbeRun>,
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub absent: usize,
    pub unknown: usize,
}

impl RunReport {
    fn new(before: LedgerSummary) -> Self {
        Self {
            before,
            after: before,
            ..Self::default()
        }
    }

    fn count(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Skipped => self.skipped += 1,
            Disposition::Saved => self.saved += 1,
            Disposition::SaveFailed => self.failed += 1,
            Disposition::Absent => self.absent += 1,
            Disposition::Unknown => self.unknown += 1,
        }
    }

    /// Identifiers that needed a page load.
    pub fn attempted(&self) -> usize {
        self.saved + self.failed + self.absent + self.unknown
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "before:\n{}", self.before)?;
        if let Some(run) = &self.probe {
            writeln!(
                f,
                "probe: scanned {}..={}, boundary {}",
                run.start, run.stop, run.found
            )?;
        }
        writeln!(
            f,
            "saved {}, skipped {}, failed {}, absent {}, unknown {}",
            self.saved, self.skipped, self.failed, self.absent, self.unknown
        )?;
        write!(f, "after:\n{}", self.after)
    }
}

/// Where one fetched identifier ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Skipped,
    Saved,
    SaveFailed,
    Absent,
    Unknown,
}

impl Disposition {
    /// What the load said about the document, whether or not it was archived.
    fn existence(self) -> Existence {
        match self {
            Disposition::Skipped | Disposition::Saved | Disposition::SaveFailed => Existence::Present,
            Disposition::Absent => Existence::Absent,
            Disposition::Unknown => Existence::Unknown,
        }
    }
}

/// An archive plus the renderer and extractor needed to grow it.
///
/// The renderer belongs to this run and is released when the pipeline is dropped.
pub struct Pipeline<R: Renderer> {
    archive: Archive,
    renderer: R,
    extractor: ArticleExtractor,
}

impl<R: Renderer> Pipeline<R> {
    pub fn open(settings: ArchiverSettings, renderer: R) -> Result<(Self, StartupReport), PipelineError> {
        let (archive, startup) = Archive::open(settings)?;
        Ok((Self::new(archive, renderer)?, startup))
    }

    pub fn new(archive: Archive, renderer: R) -> Result<Self, PipelineError> {
        let settings = archive.settings();
        let extractor = ArticleExtractor::new(
            settings.extract.clone(),
            settings.categories.clone(),
            &settings.site,
        )?;
        Ok(Self {
            archive,
            renderer,
            extractor,
        })
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn ledger(&self) -> &Ledger {
        &self.archive.ledger
    }

    /// Retry pending identifiers, probe for new ones, then fetch up to `batch_size` articles
    /// in total: pending first, then unknown identifiers below the boundary, newest first.
    pub fn run_incremental(&mut self, batch_size: usize) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::new(self.archive.ledger.summary());

        let retry: Vec<ArticleId> = self
            .archive
            .ledger
            .pending()
            .iter()
            .copied()
            .take(batch_size)
            .collect();
        if !retry.is_empty() {
            archiver_info!("retrying {} pending ids", retry.len());
        }
        // Identifiers already loaded in this run are answered from here, not loaded again.
        let mut seen: BTreeMap<ArticleId, Existence> = BTreeMap::new();
        for id in retry {
            let disposition = self.process(id)?;
            report.count(disposition);
            seen.insert(id, disposition.existence());
        }

        let settings = &self.archive.settings;
        let mut pages = PageProbe::new(
            &self.renderer,
            &settings.site,
            &settings.existence,
            settings.fetch.page_timeout,
        );
        let mut oracle = |id: ArticleId| match seen.get(&id) {
            Some(existence) => *existence,
            None => pages.check(id),
        };
        let outcome = probe(&self.archive.ledger, &settings.probe, &mut oracle, now_ts());
        let limits = settings.limits;
        self.archive.ledger.apply_probe(&outcome, &limits);
        self.archive.persist()?;
        report.probe = Some(outcome.run);

        let budget = batch_size.saturating_sub(report.attempted() + report.skipped);
        let plan: Vec<ArticleId> = self
            .archive
            .ledger
            .fetch_plan(budget + seen.len())
            .into_iter()
            .filter(|id| !seen.contains_key(id))
            .take(budget)
            .collect();
        archiver_info!("fetch plan: {} ids", plan.len());
        for id in plan {
            let disposition = self.process(id)?;
            report.count(disposition);
        }

        report.after = self.archive.ledger.summary();
        Ok(report)
    }

    /// Fetch every identifier in `start..=end`, stopping early after `max_miss` consecutive
    /// identifiers without content. Cursors only move forward.
    pub fn run_manual(
        &mut self,
        start: ArticleId,
        end: ArticleId,
        max_miss: u32,
    ) -> Result<RunReport, PipelineError> {
        if start == 0 || end < start {
            return Err(PipelineError::InvalidRange { start, end });
        }
        let mut report = RunReport::new(self.archive.ledger.summary());
        let mut misses = 0u32;
        let mut found: Option<ArticleId> = None;
        let mut stop = start;

        for id in start..=end {
            stop = id;
            let disposition = self.process(id)?;
            report.count(disposition);
            match disposition {
                Disposition::Saved | Disposition::SaveFailed | Disposition::Skipped => {
                    found = Some(id);
                    misses = 0;
                }
                Disposition::Absent | Disposition::Unknown => misses += 1,
            }
            if max_miss > 0 && misses >= max_miss {
                archiver_info!("{} consecutive misses, stopping at {}", misses, id);
                break;
            }
        }

        let limits = self.archive.settings.limits;
        self.archive
            .ledger
            .record_range_scan(start, stop, found, now_ts(), &limits);
        self.archive.persist()?;
        report.probe = self.archive.ledger.probe_history().last().copied();
        report.after = self.archive.ledger.summary();
        Ok(report)
    }

    /// Fetch one identifier, archive it and record the result. The ledger is persisted after
    /// every change.
    fn process(&mut self, id: ArticleId) -> Result<Disposition, PipelineError> {
        if self.archive.ledger.is_downloaded(id) {
            if self.archive.ledger.abandon_pending(id) {
                self.archive.persist()?;
            }
            return Ok(Disposition::Skipped);
        }

        let limits = self.archive.settings.limits;
        let disposition = match self.fetch_article(id) {
            FetchOutcome::Found(article) => {
                self.archive.ledger.queue_pending(id);
                match self.archive.writer.save(&article) {
                    Ok(saved) => {
                        archiver_info!("saved {} \"{}\" ({} files)", id, article.title, saved.paths.len());
                        self.archive.ledger.record_downloaded(id);
                        Disposition::Saved
                    }
                    Err(err) => {
                        archiver_error!("article {} not archived: {}", id, err);
                        Disposition::SaveFailed
                    }
                }
            }
            FetchOutcome::Absent => {
                archiver_debug!("article {} has no content", id);
                self.archive.ledger.abandon_pending(id);
                self.archive.ledger.record_missing(id, &limits);
                Disposition::Absent
            }
            FetchOutcome::Unknown(err) => {
                archiver_warn!("article {} unresolved: {}", id, err);
                self.archive.ledger.defer(id);
                Disposition::Unknown
            }
        };
        self.archive.persist()?;

        if disposition == Disposition::Saved && !self.archive.settings.run.sleep_between.is_zero() {
            std::thread::sleep(self.archive.settings.run.sleep_between);
        }
        Ok(disposition)
    }

    /// Load and classify one article page. Transient faults are retried before giving up.
    pub fn fetch_article(&self, id: ArticleId) -> FetchOutcome {
        let settings = &self.archive.settings;
        let url = settings.site.article_url(id);

        let mut attempt = 0;
        let load = loop {
            match self.renderer.render(&url, settings.fetch.page_timeout) {
                Err(err) if err.kind.is_transient() && attempt < settings.run.transient_retries => {
                    attempt += 1;
                    archiver_warn!("article {}: {}, retrying", id, err);
                }
                load => break load,
            }
        };
        let page = match load {
            Ok(page) => page,
            Err(err) if err.kind.is_not_found() => return FetchOutcome::Absent,
            Err(err) => return FetchOutcome::Unknown(err),
        };
        self.keep_snapshot(id, &page);

        let existence = settings.existence.classify(&page.visible_text);
        if existence == Existence::Absent {
            return FetchOutcome::Absent;
        }
        match self.extractor.extract(id, &page) {
            Some(article) => FetchOutcome::Found(article),
            None if existence == Existence::Present => FetchOutcome::Absent,
            None => FetchOutcome::Unknown(FetchError::new(
                FailureKind::NotRendered,
                format!("{} showed no article content", page.final_url),
            )),
        }
    }

    fn keep_snapshot(&self, id: ArticleId, page: &RenderedPage) {
        let Some(dir) = &self.archive.settings.run.raw_html_dir else {
            return;
        };
        if let Err(err) =
            AtomicFileWriter::new(dir).write(&format!("article_{id}.html"), &page.raw_html)
        {
            archiver_warn!("raw html for {} not kept: {}", id, err);
        }
    }
}
