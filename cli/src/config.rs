//! TOML configuration file, grounded in `neo-cli`'s `config.rs`: typed
//! sub-structs, each with its own `Default`, merged with CLI-flag
//! overrides before the kernel is built.

use std::path::{Path, PathBuf};

use agency_kernel::KernelConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSection {
    pub max_dependency_depth: u32,
    pub max_invoke_depth: u32,
    pub mint_ratio: f64,
    pub scoring_max: i64,
    pub default_window_seconds: i64,
    pub max_charge_history: usize,
    pub ubi_sink: String,
    pub default_disk_quota: u64,
    pub invoke_deadline_seconds: u64,
    pub genesis_set: Vec<String>,
    pub summary_window_events: u64,
}

impl Default for KernelSection {
    fn default() -> Self {
        let defaults = KernelConfig::default();
        Self {
            max_dependency_depth: defaults.max_dependency_depth,
            max_invoke_depth: defaults.max_invoke_depth,
            mint_ratio: defaults.mint_ratio,
            scoring_max: defaults.scoring_max,
            default_window_seconds: defaults.default_window_seconds,
            max_charge_history: defaults.max_charge_history,
            ubi_sink: defaults.ubi_sink,
            default_disk_quota: defaults.default_disk_quota,
            invoke_deadline_seconds: defaults.invoke_deadline_seconds,
            genesis_set: defaults.genesis_set,
            summary_window_events: defaults.summary_window_events,
        }
    }
}

impl KernelSection {
    pub fn into_kernel_config(self) -> KernelConfig {
        KernelConfig {
            max_dependency_depth: self.max_dependency_depth,
            max_invoke_depth: self.max_invoke_depth,
            mint_ratio: self.mint_ratio,
            scoring_max: self.scoring_max,
            default_window_seconds: self.default_window_seconds,
            max_charge_history: self.max_charge_history,
            ubi_sink: self.ubi_sink,
            default_disk_quota: self.default_disk_quota,
            invoke_deadline_seconds: self.invoke_deadline_seconds,
            genesis_set: self.genesis_set,
            summary_window_events: self.summary_window_events,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Wall-clock length of a `run` invocation, in seconds. Zero exits
    /// immediately after writing the initial checkpoint.
    pub duration_seconds: u64,
    /// How many 50ms ticks between mint auction resolutions.
    pub mint_cycle_every: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            duration_seconds: 60,
            mint_cycle_every: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Root directory for the event log, summary file, and `latest` symlink.
    pub directory: PathBuf,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub kernel: KernelSection,
    pub run: RunSection,
    pub logs: LogSection,
}

impl FileConfig {
    /// Loads from `path` if given, falling back to an all-defaults config
    /// when no path is provided. A path that is provided but unreadable or
    /// malformed is a configuration error (exit code 2).
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| CliError::Config(format!("parsing {}: {e}", path.display())))
    }
}
