use serde::{Deserialize, Serialize};

/// Parameters of the two-phase boundary probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Distance between two coarse samples.
    pub coarse_step: u64,
    /// Consecutive absent coarse samples that end the coarse phase.
    pub coarse_miss_limit: u32,
    /// Maximum distance past the scan start the coarse phase may sample.
    pub coarse_ceiling: u64,
    /// How far below the coarse result the fine scan starts.
    pub safety_margin: u64,
    /// Maximum number of IDs checked by the fine scan.
    pub fine_range: u64,
    /// Consecutive absences that end the fine phase.
    pub fine_miss_limit: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            coarse_step: 50,
            coarse_miss_limit: 5,
            coarse_ceiling: 5_000,
            safety_margin: 5,
            fine_range: 60,
            fine_miss_limit: 10,
        }
    }
}

/// Size caps applied to the ledger on every reconciliation and mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerLimits {
    pub missing_cap: usize,
    pub history_cap: usize,
}

impl Default for LedgerLimits {
    fn default() -> Self {
        Self {
            missing_cap: 800,
            history_cap: 20,
        }
    }
}
