//! Kernel-level configuration: the handful of tunables the specification
//! calls out as "should read from configuration" rather than being
//! hardcoded (mint ratio, dependency depth, rate-window defaults).
//!
//! The CLI owns the TOML file and command-line overrides; this struct is
//! the plain-data result handed to `World::build`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Maximum depth of a `depends_on` DAG, enforced at write time (I-DAG).
    pub max_dependency_depth: u32,
    /// Maximum invoke-chain depth, enforced at invoke time (§4.6.1).
    pub max_invoke_depth: u32,
    /// `scrip_minted = score / mint_ratio` in the mint auction (§4.9).
    pub mint_ratio: f64,
    /// Maximum score a scorer may return (§6, Scorer interface).
    pub scoring_max: i64,
    /// Default rolling rate-window length, in seconds, when a delegation
    /// grant does not specify one.
    pub default_window_seconds: i64,
    /// Hard cap on charge-history entries kept per (payer, charger) pair.
    pub max_charge_history: usize,
    /// Principal that receives the remainder of an uneven UBI split.
    pub ubi_sink: String,
    /// Per-principal disk quota in bytes, used by I-SIZE when a principal
    /// has no explicit `disk` right.
    pub default_disk_quota: u64,
    /// Wall-clock deadline for a single sandboxed invocation, in seconds.
    pub invoke_deadline_seconds: u64,
    /// Artifact ids that can never be deleted (I-RESERVED / genesis set),
    /// in addition to anything with the `genesis_` prefix.
    pub genesis_set: Vec<String>,
    /// Number of events per summary window.
    pub summary_window_events: u64,
    /// Hard cap on retained entries in the invocation log (§4.7's
    /// `invocations` query).
    pub max_invocation_log: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_dependency_depth: 5,
            max_invoke_depth: agency_shared::DEFAULT_DEPTH_LIMIT,
            mint_ratio: agency_shared::DEFAULT_MINT_RATIO,
            scoring_max: 100,
            default_window_seconds: agency_shared::DEFAULT_WINDOW_SECONDS,
            max_charge_history: agency_shared::DEFAULT_MAX_CHARGE_HISTORY,
            ubi_sink: agency_shared::GENESIS_TREASURY.to_string(),
            default_disk_quota: 10 * 1024 * 1024,
            invoke_deadline_seconds: 5,
            genesis_set: Vec::new(),
            summary_window_events: 50,
            max_invocation_log: agency_shared::DEFAULT_MAX_CHARGE_HISTORY,
        }
    }
}
