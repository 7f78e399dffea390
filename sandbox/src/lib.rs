//! The two collaborators the kernel core consumes but does not implement:
//! an action proposer (agent decision loop) and a sandboxed code executor,
//! plus a mint-auction scorer. Modeled the way the teacher models
//! `Externs` — `Rand`/`Consensus`/`CircSupplyCalc` traits injected into the
//! machine rather than implemented by it.
//!
//! This crate also ships `mock`, a registry-of-closures test double for
//! each trait, grounded in the teacher's `#[cfg(test)] struct DummyExterns`
//! in `fvm/src/lib.rs`.

pub mod externs;
pub mod mock;

pub use externs::{
    ActionProposer, Proposal, ResourceUsage, SandboxExecutor, SandboxOutcome, SandboxRequest,
    ScoreOutcome, Scorer, WorldSnapshot,
};
