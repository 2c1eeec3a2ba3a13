use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use archiver_core::{Category, FilesystemScan, Ledger};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{ArchiveLayout, AtomicFileWriter, CategoryRules, StoreError};

/// Archive statistics published next to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    /// Date of the newest archived file, `YYYY-MM-DD`.
    pub last_update: Option<String>,
    pub total_articles: usize,
    /// File count per category label.
    pub categories: BTreeMap<String, usize>,
    pub index: IndexTotals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexTotals {
    pub saved_total: usize,
    pub downloaded_total: usize,
    pub missing_total: usize,
    pub pending_total: usize,
    pub last_probed_id: u64,
    pub next_probe_id: u64,
}

impl ArchiveStats {
    pub fn collect(
        layout: &ArchiveLayout,
        categories: &CategoryRules,
        scan: &FilesystemScan,
        ledger: &Ledger,
    ) -> Self {
        let per_category = scan.files_per_category();
        let summary = ledger.summary();
        Self {
            last_update: newest_file_date(layout, scan),
            total_articles: per_category.get(&Category::All).copied().unwrap_or(0),
            categories: per_category
                .into_iter()
                .map(|(category, count)| (categories.label(category).to_string(), count))
                .collect(),
            index: IndexTotals {
                saved_total: summary.saved,
                downloaded_total: summary.downloaded,
                missing_total: summary.missing,
                pending_total: summary.pending,
                last_probed_id: summary.boundary,
                next_probe_id: summary.next_probe_start,
            },
        }
    }

    pub fn write(&self, layout: &ArchiveLayout) -> Result<PathBuf, StoreError> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(AtomicFileWriter::new(&layout.root).write(&layout.stats_file, &text)?)
    }
}

fn newest_file_date(layout: &ArchiveLayout, scan: &FilesystemScan) -> Option<String> {
    scan.files
        .iter()
        .filter(|file| file.category == Category::All)
        .filter_map(|file| {
            let path = layout.category_dir(file.category).join(&file.file_name);
            fs::metadata(path).and_then(|meta| meta.modified()).ok()
        })
        .max()
        .map(|modified| DateTime::<Utc>::from(modified).format("%Y-%m-%d").to_string())
}
