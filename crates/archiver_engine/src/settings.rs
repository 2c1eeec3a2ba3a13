use std::path::PathBuf;
use std::time::Duration;

use archiver_core::{LedgerLimits, ProbeSettings};
use serde::{Deserialize, Serialize};

use crate::{ArchiveLayout, CategoryRules, ExistencePolicy, ExtractSettings, FetchSettings, Site};

/// Everything one archiver run is configured by. Immutable once a run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverSettings {
    pub site: Site,
    pub fetch: FetchSettings,
    pub existence: ExistencePolicy,
    pub extract: ExtractSettings,
    pub categories: CategoryRules,
    pub probe: ProbeSettings,
    pub limits: LedgerLimits,
    pub layout: ArchiveLayout,
    pub run: RunSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Articles fetched per incremental run.
    pub batch_size: usize,
    /// Consecutive misses that end a manual range scan.
    pub max_miss: u32,
    /// Pause after every archived article.
    pub sleep_between: Duration,
    /// Extra attempts for a page load that failed with a transient fault.
    pub transient_retries: u32,
    /// When set, the raw HTML of every fetched page is kept here as `article_{id}.html`.
    pub raw_html_dir: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_miss: 20,
            sleep_between: Duration::from_secs(1),
            transient_retries: 1,
            raw_html_dir: None,
        }
    }
}
