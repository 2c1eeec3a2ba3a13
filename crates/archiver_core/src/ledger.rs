use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::probe::ProbeOutcome;
use crate::reconcile::Repair;
use crate::{ArticleId, LedgerLimits};

pub const SAVED_KEY: &str = "saved_ids";
pub const DOWNLOADED_KEY: &str = "downloaded_ids";
pub const MISSING_KEY: &str = "missing_ids";
pub const PENDING_KEY: &str = "pending_ids";
pub const BOUNDARY_KEY: &str = "last_probed_id";
pub const NEXT_PROBE_KEY: &str = "next_probe_id";
pub const HISTORY_KEY: &str = "probe_history";

/// Prefix of keys that are internal/debug only and never persisted.
const INTERNAL_KEY_PREFIX: char = '_';

/// Summary of one probe or range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRun {
    pub start: ArticleId,
    pub stop: ArticleId,
    pub found: ArticleId,
    /// Unix seconds.
    pub ts: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger document is not a JSON object (found {0})")]
    NotAnObject(&'static str),
}

/// Persisted record of crawl progress.
///
/// Identifier sets are kept as ordered sets so every serialization is deduplicated and ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ledger {
    #[serde(rename = "saved_ids")]
    saved: BTreeSet<ArticleId>,
    #[serde(rename = "downloaded_ids")]
    downloaded: BTreeSet<ArticleId>,
    #[serde(rename = "missing_ids")]
    missing: BTreeSet<ArticleId>,
    #[serde(rename = "pending_ids")]
    pending: BTreeSet<ArticleId>,
    #[serde(rename = "last_probed_id")]
    boundary: ArticleId,
    #[serde(rename = "next_probe_id")]
    next_probe_start: ArticleId,
    probe_history: VecDeque<ProbeRun>,
    /// Unknown, non-internal keys carried through untouched.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            saved: BTreeSet::new(),
            downloaded: BTreeSet::new(),
            missing: BTreeSet::new(),
            pending: BTreeSet::new(),
            boundary: 0,
            next_probe_start: 1,
            probe_history: VecDeque::new(),
            extra: Map::new(),
        }
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> &BTreeSet<ArticleId> {
        &self.saved
    }

    pub fn downloaded(&self) -> &BTreeSet<ArticleId> {
        &self.downloaded
    }

    pub fn missing(&self) -> &BTreeSet<ArticleId> {
        &self.missing
    }

    pub fn pending(&self) -> &BTreeSet<ArticleId> {
        &self.pending
    }

    /// Highest identifier confirmed to exist.
    pub fn boundary(&self) -> ArticleId {
        self.boundary
    }

    pub fn next_probe_start(&self) -> ArticleId {
        self.next_probe_start
    }

    pub fn probe_history(&self) -> impl ExactSizeIterator<Item = &ProbeRun> {
        self.probe_history.iter()
    }

    pub fn max_saved(&self) -> Option<ArticleId> {
        self.saved.last().copied()
    }

    pub fn is_downloaded(&self, id: ArticleId) -> bool {
        self.downloaded.contains(&id)
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            saved: self.saved.len(),
            downloaded: self.downloaded.len(),
            missing: self.missing.len(),
            pending: self.pending.len(),
            boundary: self.boundary,
            next_probe_start: self.next_probe_start,
        }
    }

    /// An article was written to the archive.
    pub fn record_downloaded(&mut self, id: ArticleId) {
        self.saved.insert(id);
        self.downloaded.insert(id);
        self.pending.remove(&id);
        self.missing.remove(&id);
    }

    /// A full fetch confirmed the identifier has no content.
    ///
    /// The lowest identifiers are evicted once the cache exceeds its cap.
    pub fn record_missing(&mut self, id: ArticleId, limits: &LedgerLimits) {
        self.missing.insert(id);
        trim_lowest(&mut self.missing, limits.missing_cap);
    }

    /// Queue an identifier known to exist for download. Returns `false` when it is already
    /// downloaded or already queued.
    pub fn queue_pending(&mut self, id: ArticleId) -> bool {
        if id == 0 || self.downloaded.contains(&id) {
            return false;
        }
        self.saved.insert(id);
        self.pending.insert(id)
    }

    /// Keep an identifier queued after a fetch that settled nothing. Unlike
    /// [`Ledger::queue_pending`] this does not claim the identifier exists.
    pub fn defer(&mut self, id: ArticleId) -> bool {
        if id == 0 || self.downloaded.contains(&id) {
            return false;
        }
        self.pending.insert(id)
    }

    /// Drop an identifier from the pending queue without downloading it.
    pub fn abandon_pending(&mut self, id: ArticleId) -> bool {
        self.pending.remove(&id)
    }

    /// Apply the result of a boundary probe.
    ///
    /// Neither the boundary nor the probe cursor ever moves down.
    pub fn apply_probe(&mut self, outcome: &ProbeOutcome, limits: &LedgerLimits) {
        self.raise_boundary(outcome.boundary);
        self.advance_cursor(self.boundary.saturating_add(1));
        for &id in &outcome.present {
            self.queue_pending(id);
        }
        self.push_history(outcome.run, limits);
    }

    /// Record a manual range scan over `start..=stop` whose highest hit was `found`.
    pub fn record_range_scan(
        &mut self,
        start: ArticleId,
        stop: ArticleId,
        found: Option<ArticleId>,
        ts: i64,
        limits: &LedgerLimits,
    ) {
        if let Some(found) = found {
            self.raise_boundary(found);
        }
        self.advance_cursor(stop.saturating_add(1));
        self.push_history(
            ProbeRun {
                start,
                stop,
                found: self.boundary,
                ts,
            },
            limits,
        );
    }

    /// Identifiers worth fetching next, at most `batch_size` of them.
    ///
    /// Pending identifiers come first in ascending order, followed by identifiers at or below the
    /// boundary whose state is unknown, newest first.
    pub fn fetch_plan(&self, batch_size: usize) -> Vec<ArticleId> {
        let mut plan: Vec<ArticleId> = self
            .pending
            .iter()
            .copied()
            .filter(|id| !self.downloaded.contains(id))
            .take(batch_size)
            .collect();

        let mut candidate = self.boundary;
        while plan.len() < batch_size && candidate > 0 {
            let known = self.downloaded.contains(&candidate)
                || self.missing.contains(&candidate)
                || self.pending.contains(&candidate);
            if !known {
                plan.push(candidate);
            }
            candidate -= 1;
        }
        plan
    }

    pub(crate) fn raise_boundary(&mut self, candidate: ArticleId) -> bool {
        if candidate > self.boundary {
            self.boundary = candidate;
            true
        } else {
            false
        }
    }

    pub(crate) fn advance_cursor(&mut self, candidate: ArticleId) -> bool {
        if candidate > self.next_probe_start {
            self.next_probe_start = candidate;
            true
        } else {
            false
        }
    }

    pub(crate) fn push_history(&mut self, run: ProbeRun, limits: &LedgerLimits) {
        self.probe_history.push_back(run);
        self.truncate_history(limits.history_cap);
    }

    /// Returns how many entries were dropped.
    pub(crate) fn truncate_history(&mut self, cap: usize) -> usize {
        let mut dropped = 0;
        while self.probe_history.len() > cap {
            self.probe_history.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Returns how many identifiers were evicted.
    pub(crate) fn trim_missing(&mut self, cap: usize) -> usize {
        trim_lowest(&mut self.missing, cap)
    }

    pub(crate) fn sets_mut(&mut self) -> SetsMut<'_> {
        SetsMut {
            saved: &mut self.saved,
            downloaded: &mut self.downloaded,
            missing: &mut self.missing,
            pending: &mut self.pending,
        }
    }

    /// Decode a persisted ledger document.
    ///
    /// Absent or malformed fields fall back to their defaults and are reported as repairs; only
    /// a document that is not a JSON object is rejected.
    pub fn from_json_value(value: Value) -> Result<(Ledger, Vec<Repair>), LedgerError> {
        let mut object = match value {
            Value::Object(object) => object,
            other => return Err(LedgerError::NotAnObject(json_kind(&other))),
        };
        let mut repairs = Vec::new();
        let mut ledger = Ledger::new();

        ledger.saved = decode_id_set(object.remove(SAVED_KEY), SAVED_KEY, &mut repairs);
        ledger.downloaded =
            decode_id_set(object.remove(DOWNLOADED_KEY), DOWNLOADED_KEY, &mut repairs);
        ledger.missing = decode_id_set(object.remove(MISSING_KEY), MISSING_KEY, &mut repairs);
        ledger.pending = decode_id_set(object.remove(PENDING_KEY), PENDING_KEY, &mut repairs);
        ledger.boundary = decode_cursor(object.remove(BOUNDARY_KEY), BOUNDARY_KEY, 0, &mut repairs);
        ledger.next_probe_start =
            decode_cursor(object.remove(NEXT_PROBE_KEY), NEXT_PROBE_KEY, 1, &mut repairs);
        ledger.probe_history = decode_history(object.remove(HISTORY_KEY), &mut repairs);

        let internal: Vec<String> = object
            .keys()
            .filter(|key| key.starts_with(INTERNAL_KEY_PREFIX))
            .cloned()
            .collect();
        for key in &internal {
            object.remove(key);
        }
        if !internal.is_empty() {
            repairs.push(Repair::InternalKeysStripped { keys: internal });
        }
        ledger.extra = object;

        Ok((ledger, repairs))
    }

    /// JSON document written to disk. Internal keys are never emitted.
    pub fn to_json_value(&self) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(object) = &mut value {
            object.retain(|key, _| !key.starts_with(INTERNAL_KEY_PREFIX));
        }
        Ok(value)
    }
}

pub(crate) struct SetsMut<'a> {
    pub saved: &'a mut BTreeSet<ArticleId>,
    pub downloaded: &'a mut BTreeSet<ArticleId>,
    pub missing: &'a mut BTreeSet<ArticleId>,
    pub pending: &'a mut BTreeSet<ArticleId>,
}

/// Set sizes and cursors, printed before and after every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LedgerSummary {
    pub saved: usize,
    pub downloaded: usize,
    pub missing: usize,
    pub pending: usize,
    pub boundary: ArticleId,
    pub next_probe_start: ArticleId,
}

impl fmt::Display for LedgerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "   saved:       {}", self.saved)?;
        writeln!(f, "   downloaded:  {}", self.downloaded)?;
        writeln!(f, "   missing:     {}", self.missing)?;
        writeln!(f, "   pending:     {}", self.pending)?;
        writeln!(f, "   boundary:    {}", self.boundary)?;
        write!(f, "   next probe:  {}", self.next_probe_start)
    }
}

fn trim_lowest(set: &mut BTreeSet<ArticleId>, cap: usize) -> usize {
    let mut evicted = 0;
    while set.len() > cap {
        set.pop_first();
        evicted += 1;
    }
    evicted
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn decode_id(value: &Value) -> Option<ArticleId> {
    let id = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    (id > 0).then_some(id)
}

fn decode_id_set(
    value: Option<Value>,
    field: &'static str,
    repairs: &mut Vec<Repair>,
) -> BTreeSet<ArticleId> {
    let items = match value {
        None => {
            repairs.push(Repair::FieldDefaulted { field });
            return BTreeSet::new();
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            repairs.push(Repair::FieldMalformed { field });
            return BTreeSet::new();
        }
    };

    let mut set = BTreeSet::new();
    let mut malformed = false;
    let mut canonical = true;
    let mut previous: Option<ArticleId> = None;
    for item in &items {
        match (decode_id(item), item) {
            (Some(id), Value::Number(_)) => {
                if previous.is_some_and(|p| p >= id) {
                    canonical = false;
                }
                previous = Some(id);
                set.insert(id);
            }
            (Some(id), _) => {
                canonical = false;
                set.insert(id);
            }
            (None, _) => malformed = true,
        }
    }

    if malformed {
        repairs.push(Repair::FieldMalformed { field });
    } else if !canonical {
        repairs.push(Repair::SetCanonicalized { field });
    }
    set
}

fn decode_cursor(
    value: Option<Value>,
    field: &'static str,
    default: ArticleId,
    repairs: &mut Vec<Repair>,
) -> ArticleId {
    match value {
        None => {
            repairs.push(Repair::FieldDefaulted { field });
            default
        }
        Some(Value::Number(n)) => match n.as_u64() {
            Some(v) if v >= default => v,
            _ => {
                repairs.push(Repair::FieldMalformed { field });
                default
            }
        },
        Some(_) => {
            repairs.push(Repair::FieldMalformed { field });
            default
        }
    }
}

fn decode_history(value: Option<Value>, repairs: &mut Vec<Repair>) -> VecDeque<ProbeRun> {
    let items = match value {
        None => {
            repairs.push(Repair::FieldDefaulted { field: HISTORY_KEY });
            return VecDeque::new();
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            repairs.push(Repair::FieldMalformed { field: HISTORY_KEY });
            return VecDeque::new();
        }
    };

    let total = items.len();
    let runs: VecDeque<ProbeRun> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ProbeRun>(item).ok())
        .collect();
    if runs.len() != total {
        repairs.push(Repair::FieldMalformed { field: HISTORY_KEY });
    }
    runs
}
