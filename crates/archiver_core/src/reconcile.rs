//! Repair of the ledger against the archive on disk.
//!
//! The archive directory is the source of truth for what was actually written; the ledger is a
//! cache of that fact plus the probing cursors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use archiver_logging::{archiver_debug, archiver_info};

use crate::{ArticleId, Category, Ledger, LedgerLimits};

/// One Markdown file found in a category directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub category: Category,
    pub file_name: String,
    /// `None` when the file carries no parseable identifier line.
    pub id: Option<ArticleId>,
}

/// Everything the archive directories contain, as seen by one scan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilesystemScan {
    pub files: Vec<ScannedFile>,
}

impl FilesystemScan {
    pub fn new(files: Vec<ScannedFile>) -> Self {
        Self { files }
    }

    /// Identifiers with at least one archived file.
    pub fn existing(&self) -> BTreeSet<ArticleId> {
        self.files.iter().filter_map(|file| file.id).collect()
    }

    pub fn files_per_category(&self) -> BTreeMap<Category, usize> {
        let mut counts: BTreeMap<Category, usize> =
            Category::EVERY.iter().map(|c| (*c, 0)).collect();
        for file in &self.files {
            *counts.entry(file.category).or_default() += 1;
        }
        counts
    }
}

/// One change made while loading or reconciling a ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repair {
    FieldDefaulted { field: &'static str },
    FieldMalformed { field: &'static str },
    SetCanonicalized { field: &'static str },
    InternalKeysStripped { keys: Vec<String> },
    MissingTrimmed { evicted: usize },
    DownloadedRebuilt { added: Vec<ArticleId>, removed: Vec<ArticleId> },
    SavedExtended { added: Vec<ArticleId> },
    PendingSettled { ids: Vec<ArticleId> },
    MissingSettled { ids: Vec<ArticleId> },
    BoundaryRaised { from: ArticleId, to: ArticleId },
    CursorAdvanced { from: ArticleId, to: ArticleId },
    HistoryTruncated { dropped: usize },
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repair::FieldDefaulted { field } => write!(f, "added missing field {field}"),
            Repair::FieldMalformed { field } => write!(f, "replaced malformed entries in {field}"),
            Repair::SetCanonicalized { field } => write!(f, "deduplicated and sorted {field}"),
            Repair::InternalKeysStripped { keys } => {
                write!(f, "dropped internal keys {}", keys.join(", "))
            }
            Repair::MissingTrimmed { evicted } => {
                write!(f, "evicted {evicted} oldest missing ids")
            }
            Repair::DownloadedRebuilt { added, removed } => write!(
                f,
                "rebuilt downloaded ids from archive (+{} / -{})",
                added.len(),
                removed.len()
            ),
            Repair::SavedExtended { added } => {
                write!(f, "added {} archived ids to saved", added.len())
            }
            Repair::PendingSettled { ids } => {
                write!(f, "removed {} archived ids from pending", ids.len())
            }
            Repair::MissingSettled { ids } => {
                write!(f, "removed {} archived ids from missing", ids.len())
            }
            Repair::BoundaryRaised { from, to } => write!(f, "raised boundary {from} -> {to}"),
            Repair::CursorAdvanced { from, to } => {
                write!(f, "moved next probe start {from} -> {to}")
            }
            Repair::HistoryTruncated { dropped } => {
                write!(f, "dropped {dropped} old probe history entries")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub ledger: Ledger,
    pub changed: bool,
    pub repairs: Vec<Repair>,
}

/// Bring `ledger` in line with `scan` and with its own invariants.
///
/// Running this on its own output reports `changed == false`. The boundary is never lowered.
pub fn reconcile(mut ledger: Ledger, scan: &FilesystemScan, limits: &LedgerLimits) -> Reconciliation {
    let mut repairs = Vec::new();

    let evicted = ledger.trim_missing(limits.missing_cap);
    if evicted > 0 {
        repairs.push(Repair::MissingTrimmed { evicted });
    }

    let existing = scan.existing();
    {
        let sets = ledger.sets_mut();

        if *sets.downloaded != existing {
            let added: Vec<ArticleId> = existing.difference(&*sets.downloaded).copied().collect();
            let removed: Vec<ArticleId> = sets.downloaded.difference(&existing).copied().collect();
            *sets.downloaded = existing.clone();
            repairs.push(Repair::DownloadedRebuilt { added, removed });
        }

        let added: Vec<ArticleId> = existing.difference(&*sets.saved).copied().collect();
        if !added.is_empty() {
            sets.saved.extend(added.iter().copied());
            repairs.push(Repair::SavedExtended { added });
        }

        let settled: Vec<ArticleId> = sets.pending.intersection(&existing).copied().collect();
        if !settled.is_empty() {
            for id in &settled {
                sets.pending.remove(id);
            }
            repairs.push(Repair::PendingSettled { ids: settled });
        }

        let settled: Vec<ArticleId> = sets.missing.intersection(&existing).copied().collect();
        if !settled.is_empty() {
            for id in &settled {
                sets.missing.remove(id);
            }
            repairs.push(Repair::MissingSettled { ids: settled });
        }
    }

    if let Some(max_saved) = ledger.max_saved() {
        let from = ledger.boundary();
        if ledger.raise_boundary(max_saved) {
            repairs.push(Repair::BoundaryRaised { from, to: max_saved });
        }
    }
    let floor = ledger
        .max_saved()
        .unwrap_or(0)
        .max(ledger.boundary())
        .saturating_add(1);
    let from = ledger.next_probe_start();
    if ledger.advance_cursor(floor) {
        repairs.push(Repair::CursorAdvanced { from, to: floor });
    }

    let dropped = ledger.truncate_history(limits.history_cap);
    if dropped > 0 {
        repairs.push(Repair::HistoryTruncated { dropped });
    }

    for repair in &repairs {
        archiver_debug!("ledger repair: {}", repair);
    }
    if !repairs.is_empty() {
        archiver_info!("reconciliation applied {} repair(s)", repairs.len());
    }

    Reconciliation {
        ledger,
        changed: !repairs.is_empty(),
        repairs,
    }
}

/// Read-only health report comparing the ledger with the archive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnosis {
    /// Known to exist but never written.
    pub saved_not_downloaded: Vec<ArticleId>,
    /// Archived files the ledger does not list as downloaded.
    pub untracked_files: Vec<ArticleId>,
    /// Listed as downloaded without any archived file.
    pub stale_entries: Vec<ArticleId>,
    /// Files without a parseable identifier line.
    pub unidentified_files: Vec<String>,
    /// Identifiers archived more than once inside the same category directory.
    pub duplicates: Vec<(Category, ArticleId, usize)>,
    pub pending: usize,
    /// Identifiers in `1..=max(saved)` that are neither saved nor cached as missing.
    pub gap_estimate: u64,
    pub files_per_category: BTreeMap<Category, usize>,
}

impl Diagnosis {
    pub fn is_healthy(&self) -> bool {
        self.saved_not_downloaded.is_empty()
            && self.untracked_files.is_empty()
            && self.stale_entries.is_empty()
            && self.unidentified_files.is_empty()
            && self.duplicates.is_empty()
            && self.pending == 0
    }
}

pub fn diagnose(ledger: &Ledger, scan: &FilesystemScan) -> Diagnosis {
    let existing = scan.existing();

    let mut per_category: BTreeMap<(Category, ArticleId), usize> = BTreeMap::new();
    let mut unidentified_files = Vec::new();
    for file in &scan.files {
        match file.id {
            Some(id) => *per_category.entry((file.category, id)).or_default() += 1,
            None => unidentified_files.push(file.file_name.clone()),
        }
    }
    let duplicates = per_category
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|((category, id), count)| (category, id, count))
        .collect();

    let gap_estimate = ledger.max_saved().map_or(0, |max| {
        max.saturating_sub(ledger.saved().len() as u64)
            .saturating_sub(ledger.missing().range(..=max).count() as u64)
    });

    Diagnosis {
        saved_not_downloaded: ledger.saved().difference(ledger.downloaded()).copied().collect(),
        untracked_files: existing.difference(ledger.downloaded()).copied().collect(),
        stale_entries: ledger.downloaded().difference(&existing).copied().collect(),
        unidentified_files,
        duplicates,
        pending: ledger.pending().len(),
        gap_estimate,
        files_per_category: scan.files_per_category(),
    }
}
