//! The action executor: resolves intents into kernel effects, and in
//! particular the invoke pipeline (§4.6.1) — the hard part.
//!
//! Grounded in the teacher's `call_manager/mod.rs`: `with_transaction`
//! wraps effectful work so that on failure nothing is applied
//! ("verify feasibility of all parts, then apply" — §4.6 step 3), and
//! `InvocationResult`/`FinishRet`'s nested-trace bookkeeping becomes our
//! `nested_invocations` list on the top-level `invoke` result.

use std::collections::BTreeMap;

use agency_shared::{ArtifactId, ErrorCategory, KernelError, PrincipalId};
use agency_sandbox::{ResourceUsage, SandboxExecutor, SandboxRequest};
use serde_json::Value;

use crate::artifact::{Action as ContractActionAlias, ArtifactStore, Policy, WriteParams};
use crate::config::KernelConfig;
use crate::contract::{check_permission, Action};
use crate::delegation::{ChargeTarget, DelegationManager};
use crate::intent::*;
use crate::ledger::Ledger;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<Value>,
    pub error_code: Option<String>,
    pub category: Option<ErrorCategory>,
    pub retriable: bool,
}

impl ActionResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error_code: None,
            category: None,
            retriable: false,
        }
    }

    pub fn ok_empty() -> Self {
        Self::ok(Value::Null)
    }
}

impl From<&KernelError> for ActionResult {
    fn from(err: &KernelError) -> Self {
        Self {
            success: false,
            message: Some(err.to_string()),
            data: None,
            error_code: Some(err.code().to_string()),
            category: Some(err.category()),
            retriable: err.is_retriable(),
        }
    }
}

impl From<KernelError> for ActionResult {
    fn from(err: KernelError) -> Self {
        (&err).into()
    }
}

/// One invocation trace entry, recorded depth-first in issue order
/// (nested sibling invokes are deterministic — §4.6.1).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InvocationTrace {
    pub artifact_id: String,
    pub method: String,
    pub success: bool,
    pub resources_consumed: ResourceUsage,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InvokeOutcome {
    pub success: bool,
    pub result: Option<Value>,
    pub resources_consumed: ResourceUsage,
    pub nested_invocations: Vec<InvocationTrace>,
    pub price_paid: u64,
}

pub struct ActionExecutor<'s, S: SandboxExecutor> {
    pub store: &'s mut ArtifactStore,
    pub ledger: &'s mut Ledger,
    pub delegation: &'s mut DelegationManager,
    pub sandbox: &'s S,
    pub config: &'s KernelConfig,
}

impl<'s, S: SandboxExecutor> ActionExecutor<'s, S> {
    pub fn execute(&mut self, caller: &PrincipalId, intent: Intent, reasoning: &str) -> (ActionResult, Option<Value>) {
        let _ = reasoning;
        let result = self.dispatch(caller, intent);
        match &result {
            Ok(action_result) => {
                let event_payload = action_result.data.clone();
                (action_result.clone(), event_payload)
            }
            Err(e) => (e.into(), None),
        }
    }

    fn dispatch(&mut self, caller: &PrincipalId, intent: Intent) -> Result<ActionResult, KernelError> {
        match intent {
            Intent::Noop => Ok(ActionResult::ok_empty()),
            Intent::ReadArtifact(i) => self.read_artifact(caller, &ArtifactId::new(i.artifact_id)),
            Intent::WriteArtifact(i) => self.write_artifact(caller, i),
            Intent::EditArtifact(i) => self.edit_artifact(caller, i),
            Intent::DeleteArtifact(i) => self.delete_artifact(caller, &ArtifactId::new(i.artifact_id)),
            Intent::InvokeArtifact(i) => {
                let outcome = self.invoke(
                    caller,
                    &ArtifactId::new(i.artifact_id),
                    &i.method,
                    i.args,
                    0,
                )?;
                Ok(ActionResult::ok(serde_json::to_value(outcome).unwrap()))
            }
            Intent::SubscribeArtifact(i) | Intent::UnsubscribeArtifact(i) => {
                // Subscription bookkeeping lives entirely in trigger
                // artifacts written via WriteArtifact; this variant is a
                // thin permission-checked acknowledgement.
                let id = ArtifactId::new(i.artifact_id);
                self.require_permission(caller, &id, Action::Read)?;
                Ok(ActionResult::ok_empty())
            }
            Intent::Transfer(i) => self.transfer(caller, i),
            Intent::Mint(i) => self.mint(caller, i),
            Intent::SubmitToMint(_) | Intent::SubmitToTask(_) => Err(KernelError::Internal(
                "submit_to_mint/submit_to_task are dispatched by the mint subsystem, not the executor"
                    .to_string(),
            )),
            Intent::SplitRight(_) | Intent::MergeRight(_) => Err(KernelError::Internal(
                "split_right/merge_right are dispatched by the rights registry, not the executor"
                    .to_string(),
            )),
            Intent::EscrowDeposit(_) | Intent::EscrowPurchase(_) | Intent::EscrowCancel(_) => {
                Err(KernelError::Internal(
                    "escrow intents are dispatched by the escrow registry, not the executor"
                        .to_string(),
                ))
            }
            Intent::QueryKernel(_) => Err(KernelError::Internal(
                "query_kernel is dispatched by KernelQueryHandler, not the executor".to_string(),
            )),
            Intent::ConfigureContext(_) | Intent::ModifySystemPrompt { .. } => {
                Ok(ActionResult::ok_empty())
            }
        }
    }

    fn require_permission(
        &self,
        caller: &PrincipalId,
        id: &ArtifactId,
        action: Action,
    ) -> Result<(), KernelError> {
        let artifact = self.store.get_raw(id).ok_or_else(|| KernelError::ArtifactNotFound {
            id: id.as_str().to_string(),
        })?;
        if artifact.deleted {
            return Err(KernelError::ArtifactTombstoned {
                id: id.as_str().to_string(),
            });
        }
        if !check_permission(caller, action, artifact) {
            return Err(KernelError::PermissionDenied {
                reason: format!("{:?} denied by {}", action, artifact.access_contract_id),
            });
        }
        Ok(())
    }

    fn read_artifact(&self, caller: &PrincipalId, id: &ArtifactId) -> Result<ActionResult, KernelError> {
        self.require_permission(caller, id, Action::Read)?;
        let value = self.store.get(id).expect("checked above");
        Ok(ActionResult::ok(value))
    }

    fn write_artifact(
        &mut self,
        caller: &PrincipalId,
        intent: WriteArtifactIntent,
    ) -> Result<ActionResult, KernelError> {
        let id = ArtifactId::new(intent.artifact_id.clone());
        if self.store.exists(&id) {
            self.require_permission(caller, &id, Action::Write)?;
        }
        let depends_on = intent
            .depends_on
            .into_iter()
            .map(ArtifactId::new)
            .collect::<Vec<_>>();
        self.store.write(WriteParams {
            id: id.clone(),
            kind: intent.artifact_type,
            content: intent.content,
            code: intent.code,
            executable: intent.executable,
            created_by: caller.clone(),
            caller: caller.clone(),
            access_contract_id: intent.access_contract_id,
            policy: intent.policy,
            metadata: intent.metadata,
            depends_on,
            has_standing: false,
            can_execute: false,
            kernel_protected: false,
            interface: intent.interface,
            by_kernel: false,
        })?;
        Ok(ActionResult::ok(self.store.get(&id).unwrap()))
    }

    /// Claude-Code-style unique-match replacement on `content` (treated as
    /// text). Failure codes: `not_found_in_content`, `not_unique`,
    /// `no_change`.
    fn edit_artifact(
        &mut self,
        caller: &PrincipalId,
        intent: EditArtifactIntent,
    ) -> Result<ActionResult, KernelError> {
        let id = ArtifactId::new(intent.artifact_id);
        self.require_permission(caller, &id, Action::Write)?;
        let artifact = self.store.get_raw(&id).expect("checked above");
        let text = match artifact.content.as_str() {
            Some(s) => s.to_string(),
            None => artifact.content.to_string(),
        };
        if intent.old_string == intent.new_string {
            return Err(KernelError::InvalidIntent {
                reason: "no_change".to_string(),
            });
        }
        let count = text.matches(intent.old_string.as_str()).count();
        if count == 0 {
            return Err(KernelError::InvalidIntent {
                reason: "not_found_in_content".to_string(),
            });
        }
        if count > 1 {
            return Err(KernelError::InvalidIntent {
                reason: "not_unique".to_string(),
            });
        }
        let replaced = text.replacen(&intent.old_string, &intent.new_string, 1);
        let kind = artifact.kind.clone();
        let code = artifact.code.clone();
        let executable = artifact.executable;
        let metadata = artifact.metadata.clone();
        let depends_on = artifact.depends_on.clone();
        self.store.write(WriteParams {
            id: id.clone(),
            kind,
            content: Value::String(replaced),
            code,
            executable,
            created_by: caller.clone(),
            caller: caller.clone(),
            metadata,
            depends_on,
            by_kernel: false,
            ..Default::default()
        })?;
        Ok(ActionResult::ok(self.store.get(&id).unwrap()))
    }

    fn delete_artifact(&mut self, caller: &PrincipalId, id: &ArtifactId) -> Result<ActionResult, KernelError> {
        self.require_permission(caller, id, Action::Write)?;
        self.store.delete(id, caller)?;
        Ok(ActionResult::ok_empty())
    }

    fn transfer(&mut self, caller: &PrincipalId, intent: TransferIntent) -> Result<ActionResult, KernelError> {
        let id = ArtifactId::new(intent.artifact_id);
        let to = PrincipalId::new(intent.to);
        self.require_permission(caller, &id, Action::Write)?;
        // Verify feasibility of all parts before applying anything.
        if !self.ledger.can_afford(&to, intent.price) && intent.price > 0 {
            return Err(KernelError::InsufficientFunds {
                needed: intent.price as f64,
                available: self.ledger.balance(&to) as f64,
            });
        }
        if intent.price > 0 {
            self.ledger.transfer(&to, caller, intent.price)?;
        }
        self.store.transfer_ownership(&id, &to)?;
        Ok(ActionResult::ok(serde_json::json!({
            "artifact_id": id.as_str(),
            "new_controller": to.as_str(),
            "price": intent.price,
        })))
    }

    fn mint(&mut self, caller: &PrincipalId, intent: MintIntent) -> Result<ActionResult, KernelError> {
        if intent.amount == 0 {
            return Err(KernelError::InvalidIntent {
                reason: "mint amount must be positive".to_string(),
            });
        }
        if intent.reason.trim().is_empty() {
            return Err(KernelError::InvalidIntent {
                reason: "mint requires a non-empty reason".to_string(),
            });
        }
        let _ = caller;
        let to = PrincipalId::new(intent.to);
        self.ledger.credit(&to, intent.amount);
        Ok(ActionResult::ok(serde_json::json!({
            "to": to.as_str(),
            "amount": intent.amount,
            "reason": intent.reason,
        })))
    }

    /// The invoke pipeline (§4.6.1).
    pub fn invoke(
        &mut self,
        caller: &PrincipalId,
        artifact_id: &ArtifactId,
        method: &str,
        args: Vec<Value>,
        depth: u32,
    ) -> Result<InvokeOutcome, KernelError> {
        if depth > self.config.max_invoke_depth {
            return Err(KernelError::DepthExceeded {
                depth,
                limit: self.config.max_invoke_depth,
            });
        }

        // Step 1: resolve artifact.
        let artifact = self
            .store
            .get_raw(artifact_id)
            .ok_or_else(|| KernelError::ArtifactNotFound {
                id: artifact_id.as_str().to_string(),
            })?
            .clone();
        if artifact.deleted {
            return Err(KernelError::ArtifactTombstoned {
                id: artifact_id.as_str().to_string(),
            });
        }
        if !artifact.executable {
            return Err(KernelError::InvalidArtifactType {
                kind: "not_executable".to_string(),
            });
        }
        if !check_permission(caller, ContractActionAlias::Invoke, &artifact) {
            return Err(KernelError::PermissionDenied {
                reason: "invoke denied by access contract".to_string(),
            });
        }

        // Step 2: resolve payer and check affordability / delegation.
        let charge_to = artifact
            .metadata
            .get("charge_to")
            .and_then(|v| v.as_str())
            .unwrap_or("caller");
        let payer = match charge_to {
            "caller" => self.delegation.resolve_payer(caller, ChargeTarget::Caller)?,
            "target" => self
                .delegation
                .resolve_payer(caller, ChargeTarget::Target(&artifact))?,
            other if other.starts_with("pool:") => self
                .delegation
                .resolve_payer(caller, ChargeTarget::Pool(&other[5..]))?,
            _ => caller.clone(),
        };
        let price = artifact.policy.invoke_price;
        if !self.ledger.can_afford(&payer, price) {
            return Err(KernelError::InsufficientFunds {
                needed: price as f64,
                available: self.ledger.balance(&payer) as f64,
            });
        }
        let uses_delegation = payer != *caller;
        if uses_delegation {
            self.delegation.authorize_charge(self.store, caller, &payer, price)?;
        }

        // Step 3: resolve dependencies — presented to the sandbox as a
        // dependencies map; re-entry happens lazily if the sandbox issues
        // a nested invoke (modeled here as the mock sandbox reporting
        // nested_invocations which we re-run with the same caller).
        let dependencies = artifact.depends_on.clone();

        // Step 4: execute in the sandbox.
        let request = SandboxRequest {
            code: &artifact.code,
            method,
            args,
            caller_id: caller.clone(),
            artifact_id: artifact_id.clone(),
            dependencies: dependencies.clone(),
            deadline_seconds: self.config.invoke_deadline_seconds,
        };
        let outcome = self
            .sandbox
            .execute(request)
            .map_err(|e| KernelError::ExecutionFailed {
                message: e.to_string(),
            })?;

        // Partial resource consumption is deducted even on failure.
        let cpu_cost = outcome.resources_consumed.cpu_seconds;
        if cpu_cost > 0.0 {
            let _ = self.ledger.deduct_resource(caller, "cpu_seconds", cpu_cost);
        }

        // Nested invocations are flattened depth-first into one trace
        // attributed to the top-level caller (Dan in the three-deep case),
        // not left as a tree the log would have to walk.
        let mut nested = Vec::new();
        for nested_call in &outcome.nested_invocations {
            let nested_id = ArtifactId::new(nested_call.artifact_id.clone());
            let inner = self.invoke(caller, &nested_id, &nested_call.method, Vec::new(), depth + 1);
            nested.push(InvocationTrace {
                artifact_id: nested_call.artifact_id.clone(),
                method: nested_call.method.clone(),
                success: inner.as_ref().map(|o| o.success).unwrap_or(false),
                resources_consumed: inner.as_ref().map(|o| o.resources_consumed.clone()).unwrap_or_default(),
            });
            if let Ok(inner) = inner {
                nested.extend(inner.nested_invocations);
            }
        }

        if !outcome.success {
            return Ok(InvokeOutcome {
                success: false,
                result: None,
                resources_consumed: outcome.resources_consumed,
                nested_invocations: nested,
                price_paid: 0,
            });
        }

        // Step 5: apply the charge and record it.
        if price > 0 {
            let controller = artifact.controller();
            self.ledger.transfer(&payer, &controller, price)?;
        }
        if uses_delegation {
            self.delegation.record_charge(caller, &payer, price);
        }

        Ok(InvokeOutcome {
            success: true,
            result: outcome.result,
            resources_consumed: outcome.resources_consumed,
            nested_invocations: nested,
            price_paid: price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use agency_sandbox::mock::MockSandbox;

    fn setup() -> (ArtifactStore, Ledger, DelegationManager, KernelConfig) {
        let config = KernelConfig::default();
        (
            ArtifactStore::new(config.clone()),
            Ledger::new(),
            DelegationManager::new(&config),
            config,
        )
    }

    #[test]
    fn invoke_charges_only_on_success() {
        let (mut store, mut ledger, mut delegation, config) = setup();
        let dan = PrincipalId::new("dan");
        ledger.credit(&dan, 100);
        ledger.register_principal(&dan, true);
        store
            .write(WriteParams {
                id: ArtifactId::new("x1"),
                kind: "executable".to_string(),
                content: Value::Null,
                code: "sum".to_string(),
                executable: true,
                created_by: dan.clone(),
                caller: dan.clone(),
                policy: Some(Policy {
                    invoke_price: 5,
                    ..Default::default()
                }),
                by_kernel: true,
                ..Default::default()
            })
            .unwrap();

        let sandbox = MockSandbox::new();
        let mut executor = ActionExecutor {
            store: &mut store,
            ledger: &mut ledger,
            delegation: &mut delegation,
            sandbox: &sandbox,
            config: &config,
        };
        let outcome = executor
            .invoke(&dan, &ArtifactId::new("x1"), "run", vec![Value::from(1), Value::from(2)], 0)
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.price_paid, 5);
        assert_eq!(ledger.balance(&dan), 95);
    }

    #[test]
    fn invoke_never_charges_on_failure() {
        let (mut store, mut ledger, mut delegation, config) = setup();
        let dan = PrincipalId::new("dan");
        ledger.credit(&dan, 100);
        store
            .write(WriteParams {
                id: ArtifactId::new("x1"),
                kind: "executable".to_string(),
                content: Value::Null,
                code: "unrecognized".to_string(),
                executable: true,
                created_by: dan.clone(),
                caller: dan.clone(),
                policy: Some(Policy {
                    invoke_price: 5,
                    ..Default::default()
                }),
                by_kernel: true,
                ..Default::default()
            })
            .unwrap();
        let sandbox = MockSandbox::new();
        let mut executor = ActionExecutor {
            store: &mut store,
            ledger: &mut ledger,
            delegation: &mut delegation,
            sandbox: &sandbox,
            config: &config,
        };
        let outcome = executor
            .invoke(&dan, &ArtifactId::new("x1"), "run", vec![], 0)
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(ledger.balance(&dan), 100);
    }

    #[test]
    fn depth_exceeded_fails_innermost_invoke() {
        let (mut store, mut ledger, mut delegation, mut config) = setup();
        config.max_invoke_depth = 0;
        let dan = PrincipalId::new("dan");
        store
            .write(WriteParams {
                id: ArtifactId::new("x1"),
                kind: "executable".to_string(),
                content: Value::Null,
                code: "sum".to_string(),
                executable: true,
                created_by: dan.clone(),
                caller: dan.clone(),
                by_kernel: true,
                ..Default::default()
            })
            .unwrap();
        let sandbox = MockSandbox::new();
        let mut executor = ActionExecutor {
            store: &mut store,
            ledger: &mut ledger,
            delegation: &mut delegation,
            sandbox: &sandbox,
            config: &config,
        };
        let err = executor
            .invoke(&dan, &ArtifactId::new("x1"), "run", vec![], 1)
            .unwrap_err();
        assert_eq!(err.code(), "depth_exceeded");
    }

    #[test]
    fn edit_requires_unique_match() {
        let (mut store, mut ledger, mut delegation, config) = setup();
        let alice = PrincipalId::new("alice");
        store
            .write(WriteParams {
                id: ArtifactId::new("doc"),
                kind: "data".to_string(),
                content: Value::String("aa bb aa".to_string()),
                created_by: alice.clone(),
                caller: alice.clone(),
                by_kernel: true,
                ..Default::default()
            })
            .unwrap();
        let sandbox = MockSandbox::new();
        let mut executor = ActionExecutor {
            store: &mut store,
            ledger: &mut ledger,
            delegation: &mut delegation,
            sandbox: &sandbox,
            config: &config,
        };
        let err = executor
            .dispatch(
                &alice,
                Intent::EditArtifact(EditArtifactIntent {
                    artifact_id: "doc".to_string(),
                    old_string: "aa".to_string(),
                    new_string: "cc".to_string(),
                }),
            )
            .unwrap_err();
        assert_eq!(err.code(), "invalid_intent");
        assert!(err.to_string().contains("not_unique"));
    }
}
