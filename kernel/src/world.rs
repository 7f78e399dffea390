//! The kernel: owns every component, and is the single serialization
//! point for all state-changing calls.
//!
//! Grounded in §4.11 and the teacher's top-level `DefaultMachine`/`Machine`
//! split (`fvm/src/machine/default.rs`): an explicit object built once with
//! its collaborators, offering `build → run (submit_action) → checkpoint →
//! restore` rather than module-level singletons (§9's "global mutable
//! world state" redesign flag).

use agency_sandbox::{SandboxExecutor, Scorer};
use agency_shared::{ArtifactId, KernelError, PrincipalId, Timestamp};
use serde_json::Value;

use crate::artifact::ArtifactStore;
use crate::checkpoint::Checkpoint;
use crate::config::KernelConfig;
use crate::delegation::DelegationManager;
use crate::escrow::EscrowRegistry;
use crate::event_log::{EventLog, LogDestination, SummaryCollector};
use crate::executor::{ActionExecutor, ActionResult};
use crate::intent::Intent;
use crate::invocation::InvocationLog;
use crate::ledger::Ledger;
use crate::mint_auction::{MintAuction, MintResolution};
use crate::mint_tasks::MintTaskManager;
use crate::query::KernelQueryHandler;
use crate::trigger::TriggerRegistry;

pub struct Kernel<S: SandboxExecutor> {
    pub store: ArtifactStore,
    pub ledger: Ledger,
    pub delegation: DelegationManager,
    pub mint_auction: MintAuction,
    pub mint_tasks: MintTaskManager,
    pub escrow: EscrowRegistry,
    pub invocations: InvocationLog,
    pub triggers: TriggerRegistry,
    pub event_log: EventLog,
    pub summary: SummaryCollector,
    pub config: KernelConfig,
    pub sandbox: S,
    pub scorer: Box<dyn Scorer>,
}

impl<S: SandboxExecutor> Kernel<S> {
    pub fn build(
        config: KernelConfig,
        sandbox: S,
        scorer: Box<dyn Scorer>,
        destination: LogDestination,
    ) -> std::io::Result<Self> {
        let event_log = EventLog::new(destination)?;
        let store = ArtifactStore::new(config.clone());
        let delegation = DelegationManager::new(&config);
        let summary = SummaryCollector::new(config.summary_window_events.max(1));
        let invocations = InvocationLog::new(config.max_invocation_log);
        Ok(Self {
            store,
            ledger: Ledger::new(),
            delegation,
            mint_auction: MintAuction::new(),
            mint_tasks: MintTaskManager::new(),
            escrow: EscrowRegistry::new(),
            invocations,
            triggers: TriggerRegistry::new(),
            event_log,
            summary,
            config,
            sandbox,
            scorer,
        })
    }

    /// The kernel step: parse, validate, authorize, settle, log, fire
    /// triggers, drain pending invocations. Never panics on caller error;
    /// only invariant violations propagate past `dispatch_intent`'s
    /// `Result`, and even those are caught here and translated.
    pub fn submit_action(&mut self, caller: &PrincipalId, action: Value, reasoning: &str) -> ActionResult {
        let intent = match Intent::from_json(action) {
            Ok(intent) => intent,
            Err(e) => return (&e).into(),
        };
        let action_type = intent_type_name(&intent);

        let (result, data) = match self.dispatch_intent(caller, intent) {
            Ok(result) => {
                let data = result.data.clone();
                (result, data)
            }
            Err(e) => ((&e).into(), None),
        };

        self.record_and_fire(caller, action_type, &result, data, reasoning);
        result
    }

    fn dispatch_intent(&mut self, caller: &PrincipalId, intent: Intent) -> Result<ActionResult, KernelError> {
        match intent {
            Intent::QueryKernel(q) => {
                let handler = KernelQueryHandler {
                    store: &self.store,
                    ledger: &self.ledger,
                    delegation: &self.delegation,
                    event_log: &self.event_log,
                    mint_auction: &self.mint_auction,
                    invocations: &self.invocations,
                };
                let value = handler.execute(&q.query_type, &q.params)?;
                Ok(ActionResult::ok(value))
            }
            Intent::SubmitToMint(i) => {
                let artifact_id = ArtifactId::new(i.artifact_id);
                let submission_id =
                    self.mint_auction.submit(&self.store, &mut self.ledger, caller, &artifact_id, i.bid)?;
                Ok(ActionResult::ok(serde_json::json!({"submission_id": submission_id})))
            }
            Intent::SubmitToTask(i) => {
                let artifact_id = ArtifactId::new(i.artifact_id);
                let result = self.mint_tasks.submit_solution(
                    &self.store,
                    &mut self.ledger,
                    &self.sandbox,
                    caller,
                    &artifact_id,
                    &i.task_id,
                )?;
                let success = result.success;
                if success && result.hidden_passed == Some(true) {
                    let payload = serde_json::json!({
                        "task_id": i.task_id,
                        "artifact_id": artifact_id.as_str(),
                        "solver": caller.as_str(),
                        "reward_earned": result.reward_earned,
                    });
                    let _ = self.event_log.append("mint_task_completed", payload);
                }
                let value = serde_json::to_value(&result).expect("task result serializes");
                if success {
                    Ok(ActionResult::ok(value))
                } else {
                    Ok(ActionResult {
                        success: false,
                        message: Some(result.message),
                        data: Some(value),
                        error_code: Some("task_tests_failed".to_string()),
                        category: Some(agency_shared::ErrorCategory::Validation),
                        retriable: false,
                    })
                }
            }
            Intent::SplitRight(i) => {
                let right_id = ArtifactId::new(i.right_id);
                let shares = i
                    .splits
                    .into_iter()
                    .map(|s| (ArtifactId::new(s.artifact_id), s.amount))
                    .collect();
                crate::rights::RightsRegistry::split(&mut self.store, &right_id, shares, caller)?;
                Ok(ActionResult::ok_empty())
            }
            Intent::MergeRight(i) => {
                let right_ids: Vec<ArtifactId> = i.right_ids.into_iter().map(ArtifactId::new).collect();
                crate::rights::RightsRegistry::merge(
                    &mut self.store,
                    &right_ids,
                    caller,
                    ArtifactId::new(i.new_id),
                )?;
                Ok(ActionResult::ok_empty())
            }
            Intent::EscrowDeposit(i) => {
                let artifact_id = ArtifactId::new(i.artifact_id);
                self.escrow.deposit(
                    &self.store,
                    &artifact_id,
                    caller,
                    i.price,
                    i.restricted_buyer.map(PrincipalId::new),
                )?;
                Ok(ActionResult::ok_empty())
            }
            Intent::EscrowPurchase(i) => {
                let artifact_id = ArtifactId::new(i.artifact_id);
                let price = self.escrow.purchase(&mut self.store, &mut self.ledger, &artifact_id, caller)?;
                let payload = serde_json::json!({
                    "artifact_id": artifact_id.as_str(),
                    "buyer": caller.as_str(),
                    "price": price,
                });
                let _ = self.event_log.append("artifact_purchased", payload);
                Ok(ActionResult::ok(serde_json::json!({"price_paid": price})))
            }
            Intent::EscrowCancel(i) => {
                let artifact_id = ArtifactId::new(i.artifact_id);
                self.escrow.cancel(&mut self.store, &artifact_id, caller)?;
                Ok(ActionResult::ok_empty())
            }
            Intent::InvokeArtifact(i) => {
                let artifact_id = ArtifactId::new(i.artifact_id);
                let method = i.method;
                let outcome = {
                    let mut executor = ActionExecutor {
                        store: &mut self.store,
                        ledger: &mut self.ledger,
                        delegation: &mut self.delegation,
                        sandbox: &self.sandbox,
                        config: &self.config,
                    };
                    executor.invoke(caller, &artifact_id, &method, i.args, 0)
                };
                if let Ok(outcome) = &outcome {
                    self.invocations
                        .record(artifact_id.as_str(), caller.as_str(), &method, outcome.success);
                }
                outcome.map(|o| ActionResult::ok(serde_json::to_value(o).unwrap()))
            }
            other => {
                let mut executor = ActionExecutor {
                    store: &mut self.store,
                    ledger: &mut self.ledger,
                    delegation: &mut self.delegation,
                    sandbox: &self.sandbox,
                    config: &self.config,
                };
                let (result, _) = executor.execute(caller, other, "");
                Ok(result)
            }
        }
    }

    /// Appends one event, refreshes and fires triggers, feeds the summary
    /// collector, and drains any pending invocations this step produced.
    fn record_and_fire(
        &mut self,
        caller: &PrincipalId,
        action_type: &str,
        result: &ActionResult,
        data: Option<Value>,
        reasoning: &str,
    ) {
        let event_type = if result.success { "action_executed" } else { "action_failed" };
        let payload = serde_json::json!({
            "action_type": action_type,
            "caller": caller.as_str(),
            "reasoning": reasoning,
            "success": result.success,
            "message": result.message,
            "code": result.error_code,
            "data": data,
        });

        let event = match self.event_log.append(event_type, payload) {
            Ok(event) => event,
            Err(_) => return,
        };

        self.triggers.refresh(&self.store, event.event_number);
        self.triggers.queue_matching_invocations(event_type, &event.payload);
        self.triggers.fire_scheduled_triggers(event.event_number, &event.payload);

        if let Some(summary) = self.summary.observe(&event) {
            if let Some(path) = self.event_log.summary_path() {
                if let Ok(line) = serde_json::to_string(&summary) {
                    use std::io::Write;
                    if let Ok(mut file) = std::fs::OpenOptions::new().append(true).create(true).open(path) {
                        let _ = writeln!(file, "{line}");
                    }
                }
            }
        }

        self.drain_pending_invocations();
    }

    fn drain_pending_invocations(&mut self) {
        for pending in self.triggers.drain_pending() {
            let owner = PrincipalId::new(pending.owner);
            let action = serde_json::json!({
                "action_type": "invoke_artifact",
                "artifact_id": pending.callback_artifact,
                "method": pending.callback_method,
                "args": [pending.event],
            });
            let _ = self.submit_action(&owner, action, "trigger callback");
        }
    }

    /// Resolves the mint auction and logs `mint_auction_resolved`.
    pub fn run_mint_cycle(&mut self) -> Result<MintResolution, KernelError> {
        let event_number = self.event_log.next_event_number();
        let resolution = self.mint_auction.resolve(
            &self.store,
            &mut self.ledger,
            self.scorer.as_ref(),
            &self.config,
            event_number,
        )?;
        let payload = serde_json::to_value(&resolution).expect("resolution serializes");
        let _ = self.event_log.append("mint_auction_resolved", payload);
        Ok(resolution)
    }

    /// Ensures `principal` has a ledger entry and, if `has_standing`,
    /// counts toward UBI distribution and the `principals` query.
    pub fn register_principal(&mut self, principal: &PrincipalId, has_standing: bool) {
        self.ledger.register_principal(principal, has_standing);
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            artifacts: self.store.snapshot(),
            ledger: self.ledger.snapshot(),
            mint_auction: self.mint_auction.snapshot(),
            delegation: self.delegation.snapshot(),
            escrow: self.escrow.snapshot(),
            event_number: self.event_log.current_event_number(),
        }
    }

    /// Restores full state from a checkpoint. Events before the checkpoint
    /// are not replayed (§4.11).
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.store.restore(checkpoint.artifacts);
        self.ledger.restore(checkpoint.ledger);
        self.mint_auction.restore(checkpoint.mint_auction);
        self.delegation.restore(checkpoint.delegation);
        self.escrow.restore(checkpoint.escrow);
        self.event_log.set_event_number(checkpoint.event_number);
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

fn intent_type_name(intent: &Intent) -> &'static str {
    match intent {
        Intent::Noop => "noop",
        Intent::ReadArtifact(_) => "read_artifact",
        Intent::WriteArtifact(_) => "write_artifact",
        Intent::EditArtifact(_) => "edit_artifact",
        Intent::DeleteArtifact(_) => "delete_artifact",
        Intent::InvokeArtifact(_) => "invoke_artifact",
        Intent::SubscribeArtifact(_) => "subscribe_artifact",
        Intent::UnsubscribeArtifact(_) => "unsubscribe_artifact",
        Intent::SubmitToMint(_) => "submit_to_mint",
        Intent::SubmitToTask(_) => "submit_to_task",
        Intent::Transfer(_) => "transfer",
        Intent::Mint(_) => "mint",
        Intent::SplitRight(_) => "split_right",
        Intent::MergeRight(_) => "merge_right",
        Intent::EscrowDeposit(_) => "escrow_deposit",
        Intent::EscrowPurchase(_) => "escrow_purchase",
        Intent::EscrowCancel(_) => "escrow_cancel",
        Intent::QueryKernel(_) => "query_kernel",
        Intent::ConfigureContext(_) => "configure_context",
        Intent::ModifySystemPrompt { .. } => "modify_system_prompt",
    }
}
