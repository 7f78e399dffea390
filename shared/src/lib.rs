//! Shared identifiers, timestamps, error vocabulary and content digests
//! used by every crate in the workspace.
//!
//! This crate carries no kernel logic; it only defines the vocabulary the
//! kernel, sandbox and CLI crates agree on. Logging from this crate, like
//! the rest of the workspace, goes through the `log` façade — it is up to
//! the binary crate to install a backend.

pub mod digest;
pub mod error;
pub mod ids;
pub mod time;

pub use digest::ContentDigest;
pub use error::{ErrorCategory, KernelError};
pub use ids::{ArtifactId, PrincipalId};
pub use time::Timestamp;

/// Reserved ID prefix for kernel-internal pools and sinks (e.g. `pool:ubi`).
pub const POOL_PREFIX: &str = "pool:";

/// The genesis treasury principal, used as the default UBI remainder sink.
pub const GENESIS_TREASURY: &str = "genesis_treasury";

/// Default dependency-resolution / invocation depth limit (spec §4.6.1).
pub const DEFAULT_DEPTH_LIMIT: u32 = 5;

/// Default hard cap on charge-history entries per (payer, charger) pair.
pub const DEFAULT_MAX_CHARGE_HISTORY: usize = 1000;

/// Default mint ratio: `scrip_minted = score / mint_ratio`.
pub const DEFAULT_MINT_RATIO: f64 = 10.0;

/// Default rolling rate-window length, in seconds.
pub const DEFAULT_WINDOW_SECONDS: i64 = 3600;
