//! Trait definitions for the externally supplied collaborators (§6).

use agency_shared::{ArtifactId, PrincipalId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an agent sees before proposing an action: its own balance,
/// visible artifacts, recent events, and its memory artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub agent_id: String,
    pub balance: u64,
    pub visible_artifacts: Vec<Value>,
    pub recent_events: Vec<Value>,
    pub memory: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub reasoning: String,
    pub action: Value,
}

/// Given a snapshot of world state visible to an agent, returns a
/// proposed action plus a reasoning string. The core never implements
/// this; it is supplied by the outer agent runtime.
pub trait ActionProposer {
    fn propose(&self, snapshot: &WorldSnapshot) -> anyhow::Result<Proposal>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceUsage {
    pub cpu_seconds: f64,
    pub memory_bytes: u64,
    pub wall_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedInvocation {
    pub artifact_id: String,
    pub method: String,
    pub success: bool,
}

/// One sandboxed execution request. `dependencies` exposes, for each
/// dependency id, a JSON-callable wrapper (by convention the key
/// `"invoke"` bound to that dependency) that re-enters the kernel's
/// invoke pipeline with the same caller (§4.6.1 step 3).
pub struct SandboxRequest<'a> {
    pub code: &'a str,
    pub method: &'a str,
    pub args: Vec<Value>,
    pub caller_id: PrincipalId,
    pub artifact_id: ArtifactId,
    pub dependencies: Vec<ArtifactId>,
    pub deadline_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub resources_consumed: ResourceUsage,
    pub nested_invocations: Vec<NestedInvocation>,
}

/// Runs artifact code under CPU/time/memory limits. Must terminate on
/// deadline; must expose only `invoke`, `read_content`, and the
/// dependency map as globals (§6).
pub trait SandboxExecutor {
    fn execute(&self, request: SandboxRequest<'_>) -> anyhow::Result<SandboxOutcome>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub success: bool,
    pub score: Option<i64>,
    pub reason: Option<String>,
    pub error: Option<String>,
}

/// Opaque quality scorer used by the mint auction. Given the winning
/// artifact, returns a score in `[0, scoring_max]` or an error.
pub trait Scorer {
    fn score(&self, artifact_id: &str, artifact_type: &str, content: &Value) -> anyhow::Result<ScoreOutcome>;
}
