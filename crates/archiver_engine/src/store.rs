use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use archiver_core::{Ledger, Repair};
use archiver_logging::{archiver_error, archiver_info, archiver_warn};

use crate::{move_aside, AtomicFileWriter, PersistError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ledger path {0:?} has no file name")]
    InvalidPath(PathBuf),
    #[error("failed to read ledger {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// How the ledger came to be in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOrigin {
    /// No ledger file yet.
    Fresh,
    Existing,
    /// The file could not be parsed; it was moved to `backup` and an empty ledger written.
    Recovered { backup: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedLedger {
    pub ledger: Ledger,
    pub repairs: Vec<Repair>,
    pub origin: LoadOrigin,
}

/// The ledger file on disk.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode the ledger without touching the file. `None` when there is no file.
    pub fn read(&self) -> Result<Option<(Ledger, Vec<Repair>)>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let corrupt = |reason: String| StoreError::Corrupt {
            path: self.path.clone(),
            reason,
        };
        let value = serde_json::from_str::<serde_json::Value>(&text)
            .map_err(|err| corrupt(err.to_string()))?;
        let decoded = Ledger::from_json_value(value).map_err(|err| corrupt(err.to_string()))?;
        Ok(Some(decoded))
    }

    /// Load the ledger for a run. Absent fields are defaulted; an unparsable file is moved
    /// aside as `{name}.corrupt-{unix seconds}` and replaced by an empty ledger.
    pub fn load(&self, now_ts: i64) -> Result<LoadedLedger, StoreError> {
        match self.read() {
            Ok(None) => {
                archiver_info!("no ledger at {:?}, starting fresh", self.path);
                Ok(LoadedLedger {
                    ledger: Ledger::new(),
                    repairs: Vec::new(),
                    origin: LoadOrigin::Fresh,
                })
            }
            Ok(Some((ledger, repairs))) => {
                for repair in &repairs {
                    archiver_warn!("ledger {:?}: {}", self.path, repair);
                }
                Ok(LoadedLedger {
                    ledger,
                    repairs,
                    origin: LoadOrigin::Existing,
                })
            }
            Err(StoreError::Corrupt { reason, .. }) => {
                archiver_error!("ledger {:?} is corrupt: {}", self.path, reason);
                let backup = move_aside(&self.path, &format!(".corrupt-{now_ts}"))?;
                let ledger = Ledger::new();
                self.save(&ledger)?;
                archiver_warn!("corrupt ledger moved to {:?}; wrote an empty one", backup);
                Ok(LoadedLedger {
                    ledger,
                    repairs: Vec::new(),
                    origin: LoadOrigin::Recovered { backup },
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Persist the whole ledger atomically, pretty-printed with a trailing newline.
    pub fn save(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StoreError::InvalidPath(self.path.clone()))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut text = serde_json::to_string_pretty(&ledger.to_json_value()?)?;
        text.push('\n');
        AtomicFileWriter::new(dir).write(file_name, &text)?;
        Ok(())
    }
}
