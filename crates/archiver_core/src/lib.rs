//! Archiver core: ledger state, reconciliation and boundary probing.
//!
//! Nothing in this crate touches the network or the filesystem; the engine crate feeds it
//! existence answers and directory scans.
mod article;
mod ledger;
mod probe;
mod reconcile;
mod settings;

pub use article::{Article, ArticleId, Category};
pub use ledger::{
    Ledger, LedgerError, LedgerSummary, ProbeRun, BOUNDARY_KEY, DOWNLOADED_KEY, HISTORY_KEY,
    MISSING_KEY, NEXT_PROBE_KEY, PENDING_KEY, SAVED_KEY,
};
pub use probe::{probe, Existence, ExistenceCheck, ProbeOutcome};
pub use reconcile::{
    diagnose, reconcile, Diagnosis, FilesystemScan, Reconciliation, Repair, ScannedFile,
};
pub use settings::{LedgerLimits, ProbeSettings};
