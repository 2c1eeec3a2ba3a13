//! Two-phase search for the highest existing identifier.

use std::collections::{BTreeMap, BTreeSet};

use archiver_logging::{archiver_debug, archiver_info, archiver_warn};

use crate::{ArticleId, Ledger, ProbeRun, ProbeSettings};

/// Answer of one existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Present,
    /// The site answered with its "no such document" page.
    Absent,
    /// Transport or render fault; nothing is known about the identifier.
    Unknown,
}

/// Cheap existence oracle used while probing.
pub trait ExistenceCheck {
    fn check(&mut self, id: ArticleId) -> Existence;
}

impl<F> ExistenceCheck for F
where
    F: FnMut(ArticleId) -> Existence,
{
    fn check(&mut self, id: ArticleId) -> Existence {
        self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Never lower than the boundary the probe started from.
    pub boundary: ArticleId,
    pub run: ProbeRun,
    /// Identifiers seen present during this probe, ascending.
    pub present: Vec<ArticleId>,
    /// Identifiers that stayed unknown after a retry; treated as absent for this pass only.
    pub unknown: Vec<ArticleId>,
    /// Number of existence checks issued, retries included.
    pub checks: usize,
}

struct Scan<'a> {
    oracle: &'a mut dyn ExistenceCheck,
    seen: BTreeMap<ArticleId, Existence>,
    present: BTreeSet<ArticleId>,
    unknown: BTreeSet<ArticleId>,
    checks: usize,
    highest_checked: ArticleId,
}

impl<'a> Scan<'a> {
    fn new(oracle: &'a mut dyn ExistenceCheck) -> Self {
        Self {
            oracle,
            seen: BTreeMap::new(),
            present: BTreeSet::new(),
            unknown: BTreeSet::new(),
            checks: 0,
            highest_checked: 0,
        }
    }

    /// Checks `id` at most once per probe, re-issuing a check that came back unknown once.
    fn exists(&mut self, id: ArticleId) -> bool {
        if let Some(known) = self.seen.get(&id) {
            return *known == Existence::Present;
        }

        let mut answer = self.ask(id);
        if answer == Existence::Unknown {
            archiver_warn!("probe: id {} unknown, retrying once", id);
            answer = self.ask(id);
        }
        match answer {
            Existence::Present => {
                self.present.insert(id);
            }
            Existence::Unknown => {
                archiver_warn!("probe: id {} still unknown, treating as absent for this pass", id);
                self.unknown.insert(id);
            }
            Existence::Absent => {}
        }
        self.seen.insert(id, answer);
        self.highest_checked = self.highest_checked.max(id);
        answer == Existence::Present
    }

    fn ask(&mut self, id: ArticleId) -> Existence {
        self.checks += 1;
        self.oracle.check(id)
    }
}

/// Find the current boundary, starting just past the one recorded in `ledger`.
///
/// The coarse phase samples every `coarse_step`-th identifier until `coarse_miss_limit`
/// consecutive samples are absent; the fine phase then walks every identifier around the last
/// coarse hit. The returned boundary is never below `ledger.boundary()`.
pub fn probe(
    ledger: &Ledger,
    settings: &ProbeSettings,
    oracle: &mut dyn ExistenceCheck,
    ts: i64,
) -> ProbeOutcome {
    let prior = ledger.boundary();
    let start = prior.saturating_add(1);
    let mut scan = Scan::new(oracle);

    let coarse_hit = coarse_phase(&mut scan, start, settings);
    let anchor = coarse_hit.unwrap_or(prior);
    let fine_hit = fine_phase(&mut scan, anchor, settings);

    let boundary = [Some(prior), coarse_hit, fine_hit]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(prior);
    if boundary > prior {
        archiver_info!("probe: boundary {} -> {}", prior, boundary);
    } else {
        archiver_info!("probe: boundary unchanged at {}", prior);
    }

    ProbeOutcome {
        boundary,
        run: ProbeRun {
            start,
            stop: scan.highest_checked.max(start),
            found: boundary,
            ts,
        },
        present: scan.present.into_iter().collect(),
        unknown: scan.unknown.into_iter().collect(),
        checks: scan.checks,
    }
}

fn coarse_phase(scan: &mut Scan<'_>, start: ArticleId, settings: &ProbeSettings) -> Option<ArticleId> {
    let step = settings.coarse_step.max(1);
    let ceiling = start.saturating_add(settings.coarse_ceiling);
    let miss_limit = settings.coarse_miss_limit.max(1);

    let mut hit = None;
    let mut misses = 0;
    let mut id = start;
    while id <= ceiling && misses < miss_limit {
        if scan.exists(id) {
            hit = Some(id);
            misses = 0;
        } else {
            misses += 1;
        }
        archiver_debug!("probe coarse: id {} misses {}", id, misses);
        id = match id.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    hit
}

fn fine_phase(scan: &mut Scan<'_>, anchor: ArticleId, settings: &ProbeSettings) -> Option<ArticleId> {
    let first = anchor.saturating_sub(settings.safety_margin).max(1);
    let last = first.saturating_add(settings.fine_range.saturating_sub(1));
    let miss_limit = settings.fine_miss_limit.max(1);

    let mut hit = None;
    let mut misses = 0;
    for id in first..=last {
        if misses >= miss_limit {
            break;
        }
        if scan.exists(id) {
            hit = Some(id);
            misses = 0;
        } else {
            misses += 1;
        }
    }
    archiver_debug!("probe fine: scanned from {} hit {:?}", first, hit);
    hit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checks_are_cached_within_one_probe() {
        let mut calls = Vec::new();
        let mut oracle = |id: ArticleId| {
            calls.push(id);
            if id <= 3 {
                Existence::Present
            } else {
                Existence::Absent
            }
        };
        let outcome = probe(&Ledger::new(), &ProbeSettings::default(), &mut oracle, 0);

        assert_eq!(outcome.boundary, 3);
        let mut sorted = calls.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), calls.len(), "an id was checked twice: {calls:?}");
    }

    #[test]
    fn unknown_is_retried_once_then_treated_as_absent() {
        let mut attempts = 0;
        let mut oracle = |id: ArticleId| {
            if id == 1 {
                attempts += 1;
                Existence::Unknown
            } else {
                Existence::Absent
            }
        };
        let outcome = probe(&Ledger::new(), &ProbeSettings::default(), &mut oracle, 0);

        assert_eq!(attempts, 2);
        assert_eq!(outcome.unknown, vec![1]);
        assert_eq!(outcome.boundary, 0);
    }
}
