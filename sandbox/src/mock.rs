//! In-process test doubles for the three external collaborators.
//! Grounded in the teacher's `DummyExterns` (`fvm/src/lib.rs`'s
//! `#[cfg(test)] mod test`): a struct holding closures the test registers
//! up front, with a fallback default behavior when nothing is registered.

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::Value;

use crate::externs::{
    ActionProposer, Proposal, ResourceUsage, SandboxExecutor, SandboxOutcome, SandboxRequest,
    ScoreOutcome, Scorer, WorldSnapshot,
};

type ProposeFn = Box<dyn Fn(&WorldSnapshot) -> anyhow::Result<Proposal>>;
type ExecuteFn = Box<dyn Fn(&SandboxRequest<'_>) -> anyhow::Result<SandboxOutcome>>;
type ScoreFn = Box<dyn Fn(&str, &str, &Value) -> anyhow::Result<ScoreOutcome>>;

#[derive(Default)]
pub struct MockProposer {
    responses: RefCell<HashMap<String, Proposal>>,
    handler: Option<ProposeFn>,
}

impl MockProposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, agent_id: impl Into<String>, proposal: Proposal) -> Self {
        self.responses.borrow_mut().insert(agent_id.into(), proposal);
        self
    }

    pub fn with_handler(mut self, handler: ProposeFn) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl ActionProposer for MockProposer {
    fn propose(&self, snapshot: &WorldSnapshot) -> anyhow::Result<Proposal> {
        if let Some(handler) = &self.handler {
            return handler(snapshot);
        }
        self.responses
            .borrow()
            .get(&snapshot.agent_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no mock proposal registered for {}", snapshot.agent_id))
    }
}

/// Evaluates artifact "code" as a tiny built-in arithmetic convention used
/// only by tests: `"sum"` returns the sum of its numeric args, anything
/// else fails — standing in for a real sandboxed language runtime.
#[derive(Default)]
pub struct MockSandbox {
    scripted: RefCell<HashMap<String, SandboxOutcome>>,
    handler: Option<ExecuteFn>,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, artifact_id: impl Into<String>, outcome: SandboxOutcome) -> Self {
        self.scripted.borrow_mut().insert(artifact_id.into(), outcome);
        self
    }

    pub fn with_handler(mut self, handler: ExecuteFn) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl SandboxExecutor for MockSandbox {
    fn execute(&self, request: SandboxRequest<'_>) -> anyhow::Result<SandboxOutcome> {
        if let Some(handler) = &self.handler {
            return handler(&request);
        }
        if let Some(outcome) = self.scripted.borrow().get(request.artifact_id.as_str()) {
            return Ok(outcome.clone());
        }
        if request.code.trim() == "sum" {
            let total: f64 = request
                .args
                .iter()
                .filter_map(|v| v.as_f64())
                .sum();
            return Ok(SandboxOutcome {
                success: true,
                result: Some(Value::from(total)),
                error: None,
                resources_consumed: ResourceUsage {
                    cpu_seconds: 0.001,
                    memory_bytes: 1024,
                    wall_seconds: 0.001,
                },
                nested_invocations: Vec::new(),
            });
        }
        Ok(SandboxOutcome {
            success: false,
            result: None,
            error: Some("no scripted outcome and code is not recognized".to_string()),
            resources_consumed: ResourceUsage::default(),
            nested_invocations: Vec::new(),
        })
    }
}

#[derive(Default)]
pub struct MockScorer {
    scripted: RefCell<HashMap<String, ScoreOutcome>>,
    handler: Option<ScoreFn>,
}

impl MockScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, artifact_id: impl Into<String>, outcome: ScoreOutcome) -> Self {
        self.scripted.borrow_mut().insert(artifact_id.into(), outcome);
        self
    }

    pub fn with_handler(mut self, handler: ScoreFn) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl Scorer for MockScorer {
    fn score(&self, artifact_id: &str, artifact_type: &str, content: &Value) -> anyhow::Result<ScoreOutcome> {
        if let Some(handler) = &self.handler {
            return handler(artifact_id, artifact_type, content);
        }
        Ok(self
            .scripted
            .borrow()
            .get(artifact_id)
            .cloned()
            .unwrap_or(ScoreOutcome {
                success: true,
                score: Some(0),
                reason: Some("no scripted score; defaulting to zero".to_string()),
                error: None,
            }))
    }
}
