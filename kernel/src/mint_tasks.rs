//! Task-based minting: objective, test-driven reward as an alternative to
//! opaque quality scoring.
//!
//! Grounded in `original_source/src/world/mint_tasks.py`'s `MintTaskManager`.
//! Public tests are visible to agents and returned in full detail; hidden
//! tests run after public tests pass and only ever report pass/fail, never
//! expected/actual, so a task cannot be reverse-engineered from failures.

use agency_sandbox::{SandboxExecutor, SandboxRequest};
use agency_shared::{ArtifactId, KernelError, PrincipalId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::ArtifactStore;
use crate::ledger::Ledger;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTest {
    pub test_id: String,
    pub description: String,
    pub invoke_args: Vec<Value>,
    pub expected_result: Value,
    #[serde(default = "default_assertion")]
    pub assertion_type: String,
}

fn default_assertion() -> String {
    "equals".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskTestResult {
    pub test_id: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskTestResult {
    /// Hidden-test results never carry expected/actual/error, only the
    /// boolean — this is the boundary that keeps hidden tests from being
    /// gamed by reading failure details.
    fn redact(mut self) -> Self {
        self.expected = None;
        self.actual = None;
        self.error = None;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintTask {
    pub task_id: String,
    pub description: String,
    pub reward: u64,
    #[serde(default)]
    pub public_tests: Vec<TaskTest>,
    #[serde(default)]
    pub hidden_tests: Vec<TaskTest>,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub completed_by: Option<String>,
    pub completed_at: Option<Timestamp>,
}

impl MintTask {
    pub fn is_open(&self) -> bool {
        if self.completed_by.is_some() {
            return false;
        }
        match self.expires_at {
            Some(expiry) => Timestamp::now().as_datetime() <= expiry.as_datetime(),
            None => true,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "task_id": self.task_id,
            "description": self.description,
            "reward": self.reward,
            "public_tests": self.public_tests,
            "is_open": self.is_open(),
            "created_at": self.created_at.to_iso_string(),
            "expires_at": self.expires_at.map(|t| t.to_iso_string()),
            "completed_by": self.completed_by,
            "completed_at": self.completed_at.map(|t| t.to_iso_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSubmissionResult {
    pub success: bool,
    pub task_id: String,
    pub artifact_id: String,
    pub public_results: Vec<TaskTestResult>,
    pub hidden_passed: Option<bool>,
    pub reward_earned: u64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedTaskTest {
    #[serde(default)]
    pub description: Option<String>,
    pub args: Vec<Value>,
    pub expected: Value,
    #[serde(default = "default_assertion")]
    pub assertion: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedTask {
    pub task_id: String,
    pub description: String,
    pub reward: u64,
    #[serde(default)]
    pub public_tests: Vec<SeedTaskTest>,
    #[serde(default)]
    pub hidden_tests: Vec<SeedTaskTest>,
    #[serde(default)]
    pub expires_after_seconds: Option<i64>,
}

#[derive(Debug, Default)]
pub struct MintTaskManager {
    tasks: std::collections::BTreeMap<String, MintTask>,
}

impl MintTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_from_config(&mut self, seed_tasks: Vec<SeedTask>) {
        for config in seed_tasks {
            let public_tests = config
                .public_tests
                .iter()
                .enumerate()
                .map(|(i, t)| TaskTest {
                    test_id: format!("{}_public_{}", config.task_id, i),
                    description: t.description.clone().unwrap_or_else(|| format!("Test {i}")),
                    invoke_args: t.args.clone(),
                    expected_result: t.expected.clone(),
                    assertion_type: t.assertion.clone(),
                })
                .collect();
            let hidden_tests = config
                .hidden_tests
                .iter()
                .enumerate()
                .map(|(i, t)| TaskTest {
                    test_id: format!("{}_hidden_{}", config.task_id, i),
                    description: t.description.clone().unwrap_or_else(|| format!("Hidden test {i}")),
                    invoke_args: t.args.clone(),
                    expected_result: t.expected.clone(),
                    assertion_type: t.assertion.clone(),
                })
                .collect();
            let expires_at = config.expires_after_seconds.map(|secs| {
                Timestamp::from_datetime(Timestamp::now().as_datetime() + chrono::Duration::seconds(secs))
            });
            self.tasks.insert(
                config.task_id.clone(),
                MintTask {
                    task_id: config.task_id,
                    description: config.description,
                    reward: config.reward,
                    public_tests,
                    hidden_tests,
                    created_at: Timestamp::now(),
                    expires_at,
                    completed_by: None,
                    completed_at: None,
                },
            );
        }
    }

    pub fn get_available_tasks(&self, limit: usize) -> Vec<&MintTask> {
        self.tasks.values().filter(|t| t.is_open()).take(limit).collect()
    }

    pub fn get_task(&self, task_id: &str) -> Option<&MintTask> {
        self.tasks.get(task_id)
    }

    fn run_test(
        &self,
        sandbox: &dyn SandboxExecutor,
        code: &str,
        caller: &PrincipalId,
        artifact_id: &ArtifactId,
        test: &TaskTest,
    ) -> TaskTestResult {
        let request = SandboxRequest {
            code,
            method: "run",
            args: test.invoke_args.clone(),
            caller_id: caller.clone(),
            artifact_id: artifact_id.clone(),
            dependencies: Vec::new(),
            deadline_seconds: 5,
        };
        match sandbox.execute(request) {
            Ok(outcome) if outcome.success => {
                let actual = outcome.result.unwrap_or(Value::Null);
                let passed = check_assertion(&actual, &test.expected_result, &test.assertion_type);
                TaskTestResult {
                    test_id: test.test_id.clone(),
                    passed,
                    expected: Some(test.expected_result.clone()),
                    actual: Some(actual),
                    error: None,
                }
            }
            Ok(outcome) => TaskTestResult {
                test_id: test.test_id.clone(),
                passed: false,
                expected: Some(test.expected_result.clone()),
                actual: None,
                error: Some(outcome.error.unwrap_or_else(|| "execution failed".to_string())),
            },
            Err(e) => TaskTestResult {
                test_id: test.test_id.clone(),
                passed: false,
                expected: Some(test.expected_result.clone()),
                actual: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn submit_solution(
        &mut self,
        store: &ArtifactStore,
        ledger: &mut Ledger,
        sandbox: &dyn SandboxExecutor,
        principal: &PrincipalId,
        artifact_id: &ArtifactId,
        task_id: &str,
    ) -> Result<TaskSubmissionResult, KernelError> {
        let task = self.tasks.get(task_id).ok_or_else(|| KernelError::ArtifactNotFound {
            id: task_id.to_string(),
        })?;
        if !task.is_open() {
            return Ok(TaskSubmissionResult {
                success: false,
                task_id: task_id.to_string(),
                artifact_id: artifact_id.as_str().to_string(),
                public_results: Vec::new(),
                hidden_passed: None,
                reward_earned: 0,
                message: format!("Task '{task_id}' is no longer open"),
            });
        }

        let artifact = store.get_raw(artifact_id).ok_or_else(|| KernelError::ArtifactNotFound {
            id: artifact_id.as_str().to_string(),
        })?;

        // `authorized_writer`/`authorized_principal` metadata is
        // caller-settable through an ordinary write_artifact intent, so it
        // proves nothing about who may submit this artifact — only
        // created_by, which the kernel assigns once at creation, does.
        let is_owner = artifact.created_by == *principal;
        if !is_owner {
            return Ok(TaskSubmissionResult {
                success: false,
                task_id: task_id.to_string(),
                artifact_id: artifact_id.as_str().to_string(),
                public_results: Vec::new(),
                hidden_passed: None,
                reward_earned: 0,
                message: format!("not authorized to submit artifact '{}'", artifact_id.as_str()),
            });
        }

        if artifact.code.trim().is_empty() {
            return Ok(TaskSubmissionResult {
                success: false,
                task_id: task_id.to_string(),
                artifact_id: artifact_id.as_str().to_string(),
                public_results: Vec::new(),
                hidden_passed: None,
                reward_earned: 0,
                message: format!("artifact '{}' has no executable code", artifact_id.as_str()),
            });
        }

        let code = artifact.code.clone();
        let public_results: Vec<TaskTestResult> = task
            .public_tests
            .iter()
            .map(|t| self.run_test(sandbox, &code, principal, artifact_id, t))
            .collect();
        let public_passed = public_results.iter().all(|r| r.passed);

        if !public_passed {
            return Ok(TaskSubmissionResult {
                success: false,
                task_id: task_id.to_string(),
                artifact_id: artifact_id.as_str().to_string(),
                public_results,
                hidden_passed: None,
                reward_earned: 0,
                message: "public tests failed; fix issues and try again".to_string(),
            });
        }

        let task = self.tasks.get(task_id).expect("checked above");
        let hidden_results: Vec<TaskTestResult> = task
            .hidden_tests
            .iter()
            .map(|t| self.run_test(sandbox, &code, principal, artifact_id, t).redact())
            .collect();
        let hidden_passed = hidden_results.iter().all(|r| r.passed);

        if !hidden_passed {
            return Ok(TaskSubmissionResult {
                success: false,
                task_id: task_id.to_string(),
                artifact_id: artifact_id.as_str().to_string(),
                public_results,
                hidden_passed: Some(false),
                reward_earned: 0,
                message: "public tests passed, but hidden tests failed".to_string(),
            });
        }

        let task = self.tasks.get_mut(task_id).expect("checked above");
        ledger.credit(principal, task.reward);
        task.completed_by = Some(principal.as_str().to_string());
        task.completed_at = Some(Timestamp::now());

        Ok(TaskSubmissionResult {
            success: true,
            task_id: task_id.to_string(),
            artifact_id: artifact_id.as_str().to_string(),
            public_results,
            hidden_passed: Some(true),
            reward_earned: task.reward,
            message: format!("all tests passed! earned {} scrip", task.reward),
        })
    }
}

fn check_assertion(actual: &Value, expected: &Value, assertion_type: &str) -> bool {
    match assertion_type {
        "equals" => actual == expected,
        "contains" => match (actual, expected) {
            (Value::Array(arr), needle) => arr.contains(needle),
            (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
            _ => false,
        },
        "type_is" => {
            let type_name = match actual {
                Value::Null => "null",
                Value::Bool(_) => "bool",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Array(_) => "array",
                Value::Object(_) => "object",
            };
            expected.as_str() == Some(type_name)
        }
        "truthy" => match actual {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        },
        // Unknown assertion types fail closed.
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::WriteParams;
    use crate::config::KernelConfig;
    use agency_sandbox::mock::MockSandbox;

    fn manager_with_task() -> MintTaskManager {
        let mut manager = MintTaskManager::new();
        manager.seed_from_config(vec![SeedTask {
            task_id: "double".to_string(),
            description: "double the input".to_string(),
            reward: 20,
            public_tests: vec![SeedTaskTest {
                description: Some("doubles 1 to 2".to_string()),
                args: vec![Value::from(1), Value::from(1)],
                expected: Value::from(2.0),
                assertion: "equals".to_string(),
            }],
            hidden_tests: vec![SeedTaskTest {
                description: None,
                args: vec![Value::from(2), Value::from(2)],
                expected: Value::from(4.0),
                assertion: "equals".to_string(),
            }],
            expires_after_seconds: None,
        }]);
        manager
    }

    #[test]
    fn all_tests_passing_awards_reward_and_closes_task() {
        let mut store = ArtifactStore::new(KernelConfig::default());
        store
            .write(WriteParams {
                id: ArtifactId::new("solver"),
                kind: "executable".to_string(),
                code: "sum".to_string(),
                executable: true,
                created_by: PrincipalId::new("alice"),
                caller: PrincipalId::new("alice"),
                ..Default::default()
            })
            .unwrap();
        let mut ledger = Ledger::new();
        let sandbox = MockSandbox::new();
        let mut manager = manager_with_task();

        let result = manager
            .submit_solution(
                &store,
                &mut ledger,
                &sandbox,
                &PrincipalId::new("alice"),
                &ArtifactId::new("solver"),
                "double",
            )
            .unwrap();
        assert!(result.success);
        assert_eq!(result.reward_earned, 20);
        assert_eq!(ledger.balance(&PrincipalId::new("alice")), 20);
        assert!(!manager.get_task("double").unwrap().is_open());
    }

    #[test]
    fn hidden_test_failure_reports_no_expected_actual() {
        let mut store = ArtifactStore::new(KernelConfig::default());
        store
            .write(WriteParams {
                id: ArtifactId::new("solver"),
                kind: "executable".to_string(),
                code: "sum".to_string(),
                executable: true,
                created_by: PrincipalId::new("alice"),
                caller: PrincipalId::new("alice"),
                ..Default::default()
            })
            .unwrap();
        let mut ledger = Ledger::new();
        let sandbox = MockSandbox::new();
        let mut manager = MintTaskManager::new();
        manager.seed_from_config(vec![SeedTask {
            task_id: "hard".to_string(),
            description: "impossible hidden test".to_string(),
            reward: 5,
            public_tests: vec![SeedTaskTest {
                description: None,
                args: vec![Value::from(1), Value::from(1)],
                expected: Value::from(2.0),
                assertion: "equals".to_string(),
            }],
            hidden_tests: vec![SeedTaskTest {
                description: None,
                args: vec![Value::from(1), Value::from(1)],
                expected: Value::from(999.0),
                assertion: "equals".to_string(),
            }],
            expires_after_seconds: None,
        }]);

        let result = manager
            .submit_solution(
                &store,
                &mut ledger,
                &sandbox,
                &PrincipalId::new("alice"),
                &ArtifactId::new("solver"),
                "hard",
            )
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.hidden_passed, Some(false));
        assert_eq!(ledger.balance(&PrincipalId::new("alice")), 0);
    }

    #[test]
    fn unknown_assertion_type_fails_closed() {
        assert!(!check_assertion(&Value::from(1), &Value::from(1), "regex_match"));
    }
}
